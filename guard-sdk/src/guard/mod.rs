//! Guarded calls
//!
//! [`GuardedCaller`] is the composition root for one remote resource. Every
//! call goes through the same pipeline:
//!
//! 1. wait for the `{resource}:{operation}` rate-limit slot
//! 2. ask the circuit breaker for a permit (rejections skip the monitor's
//!    attempt accounting and only bump its rejected counter)
//! 3. open a monitor attempt and run the operation under the deadline
//! 4. classify any failure, finalize the attempt, settle the breaker permit

mod builder;

pub use builder::GuardBuilder;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{AbortRegistration, Abortable};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::classifier::{classify, FailureKind};
use crate::error::{GuardError, ServiceError};
use crate::monitor::{AttemptContext, PendingAttempt, RetryInfo, ServiceMonitor};
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::transport::{RetryingClient, TransportRequest};

/// Per-call options
#[derive(Debug, Default)]
pub struct CallOptions {
    /// Overall deadline for the call, retries included. Falls back to the
    /// guard's default timeout.
    pub timeout: Option<Duration>,

    /// Diagnostics attached to the monitor's start event
    pub context: AttemptContext,

    /// Lets the caller abandon the call from elsewhere
    pub abort: Option<AbortRegistration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn abort(mut self, registration: AbortRegistration) -> Self {
        self.abort = Some(registration);
        self
    }
}

/// Clearly-marked stand-in for a result the breaker refused to fetch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fallback {
    pub status: &'static str,
    pub reason: &'static str,
    pub fallback: bool,
    pub message: String,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
}

impl Fallback {
    fn circuit_open(operation: &str, resource: &str, retry_in: Duration) -> Self {
        Self {
            status: "unavailable",
            reason: "circuit_open",
            fallback: true,
            message: format!(
                "{} is temporarily unavailable; retry in {:.1}s",
                resource,
                retry_in.as_secs_f64()
            ),
            operation: operation.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of an opted-in fallback call
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T> {
    Available(T),
    Unavailable(Fallback),
}

impl<T> Guarded<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Guarded::Available(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Guarded::Available(value) => Some(value),
            Guarded::Unavailable(_) => None,
        }
    }
}

struct Completed<T> {
    value: T,
    size: Option<usize>,
}

struct AttemptFailure {
    message: String,
    retry_attempt: u32,
}

fn cancelled_message() -> String {
    ServiceError::cancelled("abandoned by caller").to_string()
}

/// Monitor attempt owned by one guarded call.
///
/// If the call future is dropped before the attempt is finalized, the drop
/// records it as an `Unknown` failure so every `REQUEST_START` gets a
/// terminal record.
struct AttemptGuard<'a> {
    monitor: &'a ServiceMonitor,
    attempt: Option<PendingAttempt>,
    request_id: String,
    operation: String,
    max_retries: u32,
}

impl<'a> AttemptGuard<'a> {
    fn new(monitor: &'a ServiceMonitor, attempt: PendingAttempt, max_retries: u32) -> Self {
        Self {
            monitor,
            request_id: attempt.request_id().to_string(),
            operation: attempt.operation().to_string(),
            attempt: Some(attempt),
            max_retries,
        }
    }

    fn succeed(mut self, size: Option<usize>) {
        if let Some(attempt) = self.attempt.take() {
            self.monitor.record_success(attempt, size);
        }
    }

    fn fail(mut self, kind: FailureKind, message: String, retry_attempt: u32) -> GuardError {
        let retry = RetryInfo {
            retry_attempt,
            max_retries: self.max_retries,
        };
        let recorded = self
            .attempt
            .take()
            .and_then(|attempt| self.monitor.record_failure(attempt, kind, &message, retry).error_message);

        GuardError::Failed {
            request_id: std::mem::take(&mut self.request_id),
            operation: std::mem::take(&mut self.operation),
            kind,
            message: recorded.unwrap_or(message),
        }
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            log::warn!("Call {} dropped before completion", self.request_id);
            let retry = RetryInfo {
                retry_attempt: 0,
                max_retries: self.max_retries,
            };
            self.monitor
                .record_failure(attempt, FailureKind::Unknown, &cancelled_message(), retry);
        }
    }
}

enum Bounded<T> {
    Finished(T),
    TimedOut(Duration),
    Aborted,
}

/// Run `fut` until it finishes, `timeout` passes or the caller aborts
async fn run_bounded<F: Future>(
    fut: F,
    timeout: Option<Duration>,
    abort: Option<AbortRegistration>,
) -> Bounded<F::Output> {
    let abortable = async move {
        match abort {
            Some(registration) => Abortable::new(fut, registration).await.ok(),
            None => Some(fut.await),
        }
    };

    let finished = match timeout {
        Some(limit) => match tokio::time::timeout(limit, abortable).await {
            Ok(finished) => finished,
            Err(_) => return Bounded::TimedOut(limit),
        },
        None => abortable.await,
    };

    match finished {
        Some(output) => Bounded::Finished(output),
        None => Bounded::Aborted,
    }
}

/// Rate limiter, circuit breaker, retrying client and monitor for one resource
#[derive(Debug)]
pub struct GuardedCaller {
    resource: String,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<ServiceMonitor>,
    rate_limiter: Arc<RateLimiter>,
    client: Option<RetryingClient>,
    default_timeout: Option<Duration>,
}

impl GuardedCaller {
    pub fn builder(resource: impl Into<String>) -> GuardBuilder {
        GuardBuilder::new(resource)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn monitor(&self) -> &Arc<ServiceMonitor> {
        &self.monitor
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Guard an arbitrary operation.
    ///
    /// The operation is not retried here; its error message is classified
    /// as-is.
    pub async fn call<F, Fut, T, E>(&self, operation: &str, options: CallOptions, f: F) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.guarded(operation, options, 0, move |_deadline| async move {
            f().await
                .map(|value| Completed { value, size: None })
                .map_err(|e| AttemptFailure {
                    message: e.to_string(),
                    retry_attempt: 0,
                })
        })
        .await
    }

    /// Guard an HTTP request through the retrying client
    pub async fn call_http(
        &self,
        operation: &str,
        request: TransportRequest,
        options: CallOptions,
    ) -> Result<Value, GuardError> {
        let client = self.client.as_ref().ok_or_else(|| {
            GuardError::Misconfigured(format!("no transport configured for {}", self.resource))
        })?;
        let max_retries = client.retry_config().max_retries;

        self.guarded(operation, options, max_retries, move |deadline| async move {
            client
                .execute(&request, deadline)
                .await
                .map(|response| Completed {
                    value: response.body,
                    size: Some(response.size_bytes),
                })
                .map_err(|e| AttemptFailure {
                    message: e.to_string(),
                    retry_attempt: e.retry_attempts(),
                })
        })
        .await
    }

    /// Like [`call`](Self::call), but a breaker rejection comes back as a
    /// [`Fallback`] instead of an error
    pub async fn call_with_fallback<F, Fut, T, E>(
        &self,
        operation: &str,
        options: CallOptions,
        f: F,
    ) -> Result<Guarded<T>, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match self.call(operation, options, f).await {
            Ok(value) => Ok(Guarded::Available(value)),
            Err(GuardError::CircuitOpen { resource, retry_in }) => {
                log::info!("Returning fallback for {} on {}", operation, resource);
                Ok(Guarded::Unavailable(Fallback::circuit_open(operation, &resource, retry_in)))
            }
            Err(e) => Err(e),
        }
    }

    async fn guarded<F, Fut, T>(
        &self,
        operation: &str,
        options: CallOptions,
        max_retries: u32,
        run: F,
    ) -> Result<T, GuardError>
    where
        F: FnOnce(Option<Instant>) -> Fut,
        Fut: Future<Output = Result<Completed<T>, AttemptFailure>>,
    {
        let key = RateLimiter::key(&self.resource, operation);
        self.rate_limiter.acquire(&key).await;

        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                self.monitor.record_rejection(operation, &self.resource, open.retry_in);
                return Err(GuardError::CircuitOpen {
                    resource: self.resource.clone(),
                    retry_in: open.retry_in,
                });
            }
        };

        let timeout = options.timeout.or(self.default_timeout);
        let deadline = timeout.map(|t| Instant::now() + t);
        let pending = self
            .monitor
            .start_attempt(operation, self.resource.as_str(), options.context, timeout);
        let attempt = AttemptGuard::new(&self.monitor, pending, max_retries);

        match run_bounded(run(deadline), timeout, options.abort).await {
            Bounded::Finished(Ok(done)) => {
                attempt.succeed(done.size);
                permit.success();
                Ok(done.value)
            }
            Bounded::Finished(Err(failure)) => {
                let kind = classify(&failure.message);
                let err = attempt.fail(kind, failure.message, failure.retry_attempt);
                permit.failure();
                Err(err)
            }
            Bounded::TimedOut(limit) => {
                let message = format!("Operation timed out after {:.1}s", limit.as_secs_f64());
                let err = attempt.fail(FailureKind::Timeout, message, 0);
                permit.failure();
                Err(err)
            }
            Bounded::Aborted => {
                let err = attempt.fail(FailureKind::Unknown, cancelled_message(), 0);
                // dropping the permit frees a half-open trial without a verdict
                drop(permit);
                Err(err)
            }
        }
    }
}
