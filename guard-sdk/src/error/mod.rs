//! Error handling for the Guard SDK
//!
//! Two layers of errors live here:
//! - `ServiceError` is what a transport produces. It is categorised so the
//!   retry policy can decide what is worth another attempt, and can carry
//!   rich context (status code, retry-after hint, attempt count).
//! - `GuardError` is the only failure type that crosses the guarded-call
//!   boundary. It is either a protective rejection by the circuit breaker or
//!   a classified failure of a real attempt.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::classifier::FailureKind;

pub mod mapping;

/// Result type for transport-level operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Transport-level error
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Connection-level failures (refused, reset, unreachable)
    #[error("Connection failed: {0}")]
    Network(String),

    /// The remote side or a deadline timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Non-success HTTP status
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    /// Authorization errors (permission issues)
    #[error("Access denied: {0}")]
    Authorization(String),

    /// Response body could not be used
    #[error("{0}")]
    Parsing(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller abandoned the request
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Unknown errors
    #[error("Unknown error: {0}")]
    Unknown(String),

    /// Errors with additional context
    #[error("{inner}")]
    WithContext {
        inner: Box<ServiceError>,
        context: ErrorContext,
    },
}

impl ServiceError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        ServiceError::Network(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        ServiceError::Timeout(message.into())
    }

    /// Create an HTTP status error
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ServiceError::Http {
            status,
            message: message.into(),
        }
    }

    /// Create an authorization error
    pub fn authorization(message: impl Into<String>) -> Self {
        ServiceError::Authorization(message.into())
    }

    /// Create a parsing error
    pub fn parsing(message: impl Into<String>) -> Self {
        ServiceError::Parsing(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        ServiceError::Configuration(message.into())
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        ServiceError::Cancelled(message.into())
    }

    /// Create an unknown error
    pub fn unknown(message: impl Into<String>) -> Self {
        ServiceError::Unknown(message.into())
    }

    /// Add context to an existing error, merging with any context already present
    pub fn with_context(self, context: ErrorContext) -> Self {
        match self {
            ServiceError::WithContext {
                inner,
                context: existing,
            } => ServiceError::WithContext {
                inner,
                context: existing.merge(context),
            },
            other => ServiceError::WithContext {
                inner: Box::new(other),
                context,
            },
        }
    }

    /// Add a single context key/value to an existing error
    pub fn with_context_value(self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let mut context = ErrorContext::new();
        context.add(key, value);
        self.with_context(context)
    }

    /// The error with any context wrappers removed
    pub fn root(&self) -> &ServiceError {
        match self {
            ServiceError::WithContext { inner, .. } => inner.root(),
            other => other,
        }
    }

    /// Attached context, if any
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            ServiceError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self.root() {
            ServiceError::Http { status, .. } => Some(*status),
            _ => self.context().and_then(|c| c.status_code),
        }
    }

    /// Server-supplied retry-after hint, if the transport exposed one
    pub fn retry_after(&self) -> Option<Duration> {
        self.context().and_then(|c| c.retry_after)
    }

    /// Number of retries spent before this error was surfaced
    pub fn retry_attempts(&self) -> u32 {
        self.context()
            .and_then(|c| c.data.get("attempts"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Check whether this error is a connection-level failure
    pub fn is_connection_failure(&self) -> bool {
        matches!(self.root(), ServiceError::Network(_))
    }
}

/// Error context information
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Service that generated the error
    pub service: Option<String>,

    /// HTTP status code if applicable
    pub status_code: Option<u16>,

    /// Request ID for tracing
    pub request_id: Option<String>,

    /// Endpoint that was called
    pub endpoint: Option<String>,

    /// Retry-After hint supplied by the server
    pub retry_after: Option<Duration>,

    /// Additional context data
    pub data: HashMap<String, String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new error context for a specific service
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..Self::default()
        }
    }

    /// Add an HTTP status code
    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Add a request ID
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Add an endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Add a retry-after hint
    pub fn retry_after(mut self, hint: Duration) -> Self {
        self.retry_after = Some(hint);
        self
    }

    /// Add a context value
    pub fn add<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.data.insert(key.into(), value.to_string());
    }

    /// Add a context value and return self (builder pattern)
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.add(key, value);
        self
    }

    /// Overlay `other` on top of `self`; fields set in `other` win
    fn merge(mut self, other: ErrorContext) -> Self {
        self.service = other.service.or(self.service);
        self.status_code = other.status_code.or(self.status_code);
        self.request_id = other.request_id.or(self.request_id);
        self.endpoint = other.endpoint.or(self.endpoint);
        self.retry_after = other.retry_after.or(self.retry_after);
        self.data.extend(other.data);
        self
    }
}

/// Convert reqwest errors to ServiceError
impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        let context = ErrorContext::for_service("http_client");

        let service_error = if err.is_timeout() {
            ServiceError::timeout(err.to_string())
        } else if err.is_connect() {
            ServiceError::network(err.to_string())
        } else if err.is_decode() {
            ServiceError::parsing(format!("JSON decode error: {}", err))
        } else if err.is_request() || err.is_body() {
            // Broken pipes and resets surface here while the body is in flight
            ServiceError::network(err.to_string())
        } else {
            ServiceError::unknown(format!("HTTP client error: {}", err))
        };

        match err.status() {
            Some(status) => service_error.with_context(context.status_code(status.as_u16())),
            None => service_error.with_context(context),
        }
    }
}

/// Convert serde_json errors to ServiceError
impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::parsing(format!("JSON decode error: {}", err))
    }
}

/// Failure returned at the guarded-call boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardError {
    /// The breaker rejected the call without touching the resource
    #[error("Circuit breaker is open for {resource}; next trial in {retry_in:?}")]
    CircuitOpen { resource: String, retry_in: Duration },

    /// A real attempt was made and failed
    #[error("{operation} failed ({kind}): {message}")]
    Failed {
        request_id: String,
        operation: String,
        kind: FailureKind,
        message: String,
    },

    /// The caller asked for something this guard was not built with
    #[error("Guard misconfigured: {0}")]
    Misconfigured(String),
}

impl GuardError {
    /// Classified failure kind; `None` for breaker rejections
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            GuardError::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this is a protective breaker rejection
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen { .. })
    }

    /// Monitor request id of the failed attempt
    pub fn request_id(&self) -> Option<&str> {
        match self {
            GuardError::Failed { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}
