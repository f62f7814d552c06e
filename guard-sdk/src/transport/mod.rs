//! Transport abstraction and the retrying client
//!
//! A [`Transport`] performs one request and reports what came back, without
//! judging it. [`RetryingClient`] turns that into a success or a typed
//! failure: non-2xx statuses are mapped to errors, bodies are validated as
//! JSON, and allow-listed failures are retried with backoff.

mod http;

pub use http::{redact_headers, HttpTransport, HttpTransportBuilder, REQUEST_ID_HEADER};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::mapping::map_http_error;
use crate::error::{ErrorContext, Result, ServiceError};
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::util::preview;

/// One outbound request, relative to the transport's base address
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw result of one request
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, if the server sent one
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Capability to reach a remote service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single request. Connection-level problems are errors;
    /// any response, whatever its status, is `Ok`.
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse>;
}

/// Validated JSON response
#[derive(Debug, Clone, PartialEq)]
pub struct JsonResponse {
    pub body: Value,
    pub size_bytes: usize,
}

/// Validate that a response body is a JSON document.
///
/// Each failure mode has its own message so it can be told apart in logs.
pub fn validate_json_body(body: &str) -> Result<Value> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::parsing("Empty response body, expected a JSON document"));
    }

    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return Err(ServiceError::parsing(format!(
            "Response doesn't appear to be JSON. Content preview: {}",
            preview(trimmed, 100)
        )));
    }

    Ok(serde_json::from_str(trimmed)?)
}

/// Transport wrapped with status mapping, body validation and retries
#[derive(Clone)]
pub struct RetryingClient {
    service: String,
    transport: Arc<dyn Transport>,
    retry: RetryExecutor,
}

impl std::fmt::Debug for RetryingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingClient")
            .field("service", &self.service)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RetryingClient {
    pub fn new(service: impl Into<String>, transport: Arc<dyn Transport>, config: RetryConfig) -> Self {
        Self {
            service: service.into(),
            transport,
            retry: RetryExecutor::new(config),
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        self.retry.config()
    }

    /// Send `request`, retrying allow-listed failures until success, a
    /// terminal error, exhausted retries or `deadline`.
    pub async fn execute(&self, request: &TransportRequest, deadline: Option<Instant>) -> Result<JsonResponse> {
        self.retry
            .execute(deadline, || self.attempt(request))
            .await
    }

    async fn attempt(&self, request: &TransportRequest) -> Result<JsonResponse> {
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            let status = StatusCode::from_u16(response.status)
                .map_err(|e| ServiceError::unknown(format!("Invalid status {}: {}", response.status, e)))?;

            let mut context = ErrorContext::for_service(&self.service)
                .status_code(response.status)
                .endpoint(&request.path);
            if let Some(hint) = response.retry_after {
                context = context.retry_after(hint);
            }

            return Err(map_http_error(status, &response.body).with_context(context));
        }

        let body = validate_json_body(&response.body)
            .map_err(|e| e.with_context(ErrorContext::for_service(&self.service).endpoint(&request.path)))?;

        Ok(JsonResponse {
            body,
            size_bytes: response.body.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn client(mock: MockTransport, max_retries: u32) -> RetryingClient {
        let config = RetryConfig {
            max_retries,
            backoff_factor: 0.01,
            randomization_factor: 0.0,
            ..RetryConfig::default()
        };
        RetryingClient::new("test", Arc::new(mock), config)
    }

    #[test]
    fn test_validate_json_body() {
        assert_eq!(validate_json_body(" {\"a\": 1} ").unwrap(), json!({"a": 1}));
        assert!(validate_json_body("[1, 2]").is_ok());

        let empty = validate_json_body("   ").unwrap_err().to_string();
        assert!(empty.contains("Empty response body"));

        let html = validate_json_body("<html>\n<body>oops</body></html>").unwrap_err().to_string();
        assert!(html.contains("doesn't appear to be JSON"));
        assert!(!html.contains('\n'));

        let broken = validate_json_body("{\"a\": ").unwrap_err().to_string();
        assert!(broken.starts_with("JSON decode error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_503_then_succeeds() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(TransportResponse::new(503, "")));
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(TransportResponse::new(200, "{\"ok\": true}")));

        let response = client(mock, 2)
            .execute(&TransportRequest::get("/health"), None)
            .await
            .unwrap();
        assert_eq!(response.body, json!({"ok": true}));
        assert_eq!(response.size_bytes, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_is_terminal() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(TransportResponse::new(404, "{\"message\": \"no such table\"}")));

        let err = client(mock, 3)
            .execute(&TransportRequest::get("/tables/x"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert!(err.to_string().contains("no such table"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_retried_until_exhausted() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .times(3)
            .returning(|_| Err(ServiceError::network("connection reset by peer")));

        let result = client(mock, 2).execute(&TransportRequest::get("/"), None).await;
        let err = assert_err!(result);
        assert_eq!(err.retry_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_not_retried() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(TransportResponse::new(200, "Service temporarily down")));

        let err = client(mock, 3)
            .execute(&TransportRequest::get("/"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Content preview: Service temporarily down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_carried_into_error_context() {
        let mut mock = MockTransport::new();
        mock.expect_send().times(1).returning(|_| {
            Ok(TransportResponse::new(429, "slow down").with_retry_after(Duration::from_secs(7)))
        });

        let err = client(mock, 0)
            .execute(&TransportRequest::get("/"), None)
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(err.status_code(), Some(429));
    }

    #[tokio::test]
    async fn test_request_passed_through() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|req| req.method == Method::POST && req.path == "/statements" && req.body.is_some())
            .times(1)
            .returning(|_| Ok(TransportResponse::new(200, "[]")));

        let request = TransportRequest::post("/statements", json!({"statement": "SELECT 1"}));
        assert_ok!(client(mock, 0).execute(&request, None).await);
    }
}
