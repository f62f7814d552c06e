//! Bounded retry with exponential backoff
//!
//! Only allow-listed conditions are retried: connection-level failures and
//! HTTP statuses in the configured set. Everything else is terminal on first
//! occurrence. A server-supplied retry-after hint replaces the computed
//! backoff for that wait.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::time::Instant;

use crate::error::mapping::{is_retryable_status, DEFAULT_RETRYABLE_STATUSES};
use crate::error::{Result, ServiceError};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries)
    pub max_retries: u32,

    /// Delay before the first retry, in seconds
    pub backoff_factor: f64,

    /// Growth factor applied to the delay after each retry
    pub multiplier: f64,

    /// Maximum backoff duration
    pub max_interval: Duration,

    /// Jitter applied to each delay (0.0 disables it)
    pub randomization_factor: f64,

    /// HTTP statuses worth retrying
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_factor: 1.5,
            multiplier: 2.0,
            max_interval: Duration::from_secs(30),
            randomization_factor: 0.1,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Validate this configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.backoff_factor >= 0.0 && self.backoff_factor.is_finite()) {
            return Err(ServiceError::configuration("retry backoff_factor must be a non-negative number"));
        }
        if self.backoff_factor > self.max_interval.as_secs_f64() {
            return Err(ServiceError::configuration(format!(
                "retry backoff_factor must not exceed max_interval ({}s)",
                self.max_interval.as_secs_f64()
            )));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(ServiceError::configuration("retry multiplier must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(ServiceError::configuration("retry randomization_factor must be within [0, 1]"));
        }
        Ok(())
    }

    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::try_from_secs_f64(self.backoff_factor)
                .map_or(self.max_interval, |initial| initial.min(self.max_interval)),
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: self.randomization_factor,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        backoff.reset();
        backoff
    }
}

impl fmt::Display for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryConfig {{ max_retries: {}, backoff_factor: {}, multiplier: {}, max_interval: {:?}, statuses: {:?} }}",
            self.max_retries, self.backoff_factor, self.multiplier, self.max_interval, self.retryable_statuses
        )
    }
}

/// Executor for retry operations with exponential backoff
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the specified configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute a fallible operation with retries according to the configuration.
    ///
    /// When `deadline` is set, no retry is scheduled whose wait would end past
    /// it; the call fails with a timeout instead. The surfaced error carries the
    /// number of retries spent under the `attempts` context key.
    pub async fn execute<F, Fut, T>(&self, deadline: Option<Instant>, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.config.backoff();
        let mut retries = 0;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.should_retry(&err) || retries >= self.config.max_retries {
                return Err(Self::annotate(err, retries));
            }

            let computed = backoff.next_backoff().unwrap_or(self.config.max_interval);
            let delay = err
                .retry_after()
                .map(|hint| hint.min(self.config.max_interval))
                .unwrap_or(computed);

            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    log::warn!(
                        "Deadline reached, abandoning retries after {} attempt(s): {}",
                        retries + 1,
                        err
                    );
                    return Err(ServiceError::timeout(format!(
                        "deadline exceeded after {} attempt(s); last error: {}",
                        retries + 1,
                        err
                    ))
                    .with_context_value("attempts", retries));
                }
            }

            retries += 1;
            log::warn!(
                "Operation failed with retryable error, retrying in {:?} (attempt {}/{}): {}",
                delay,
                retries,
                self.config.max_retries,
                err
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Determine if an error should be retried
    pub fn should_retry(&self, error: &ServiceError) -> bool {
        if error.is_connection_failure() {
            return true;
        }
        error
            .status_code()
            .map(|status| is_retryable_status(status, &self.config.retryable_statuses))
            .unwrap_or(false)
    }

    /// Get the current retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn annotate(err: ServiceError, retries: u32) -> ServiceError {
        if retries > 0 {
            err.with_context_value("attempts", retries)
        } else {
            err
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::error::ErrorContext;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            backoff_factor: 0.1,
            randomization_factor: 0.0,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let retry = RetryExecutor::default();
        let result = retry.execute(None, || async { Ok::<_, ServiceError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_retryable_status() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let retry = RetryExecutor::new(fast_config(2));

        let counter = Arc::clone(&attempt_count);
        let result = retry
            .execute(None, move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ServiceError::http(503, "Service Unavailable"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_on_terminal_status() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let retry = RetryExecutor::new(fast_config(3));

        let counter = Arc::clone(&attempt_count);
        let result: Result<()> = retry
            .execute(None, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::http(404, "Not Found"))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(err.retry_attempts(), 0);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_exceeded_surfaces_last_error() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let retry = RetryExecutor::new(fast_config(2));

        let counter = Arc::clone(&attempt_count);
        let result: Result<()> = retry
            .execute(None, move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::network(format!("reset #{}", n)))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("reset #2"));
        assert_eq!(err.retry_attempts(), 2);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_delays() {
        let retry = RetryExecutor::new(RetryConfig {
            max_retries: 3,
            backoff_factor: 0.5,
            multiplier: 2.0,
            randomization_factor: 0.0,
            ..RetryConfig::default()
        });

        let start = Instant::now();
        let result: Result<()> = retry
            .execute(None, || async { Err(ServiceError::http(502, "Bad Gateway")) })
            .await;

        assert!(result.is_err());
        // 0.5 + 1.0 + 2.0
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3500) && elapsed < Duration::from_millis(3510));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_takes_precedence() {
        let retry = RetryExecutor::new(RetryConfig {
            max_retries: 1,
            backoff_factor: 10.0,
            randomization_factor: 0.0,
            ..RetryConfig::default()
        });

        let start = Instant::now();
        let result: Result<()> = retry
            .execute(None, || async {
                Err(ServiceError::http(429, "Too Many Requests")
                    .with_context(ErrorContext::new().retry_after(Duration::from_secs(2))))
            })
            .await;

        assert!(result.is_err());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_capped_at_max_interval() {
        let retry = RetryExecutor::new(RetryConfig {
            max_retries: 1,
            backoff_factor: 1.0,
            max_interval: Duration::from_secs(5),
            randomization_factor: 0.0,
            ..RetryConfig::default()
        });

        let start = Instant::now();
        let result: Result<()> = retry
            .execute(None, || async {
                Err(ServiceError::http(503, "Service Unavailable")
                    .with_context(ErrorContext::new().retry_after(Duration::from_secs(u64::MAX / 4))))
            })
            .await;

        assert!(result.is_err());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_millis(5010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let retry = RetryExecutor::new(RetryConfig {
            max_retries: 5,
            backoff_factor: 1.0,
            randomization_factor: 0.0,
            ..RetryConfig::default()
        });

        let counter = Arc::clone(&attempt_count);
        let deadline = Instant::now() + Duration::from_millis(2500);
        let result: Result<()> = retry
            .execute(Some(deadline), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::network("refused"))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err.root(), ServiceError::Timeout(_)));
        // waits of 1s then 2s: the second would cross the deadline
        assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
        assert_eq!(err.retry_attempts(), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        let bad = RetryConfig {
            randomization_factor: 2.0,
            ..RetryConfig::default()
        };
        assert!(bad.validate().is_err());

        let huge_factor = RetryConfig {
            backoff_factor: 1e30,
            ..RetryConfig::default()
        };
        assert!(huge_factor.validate().is_err());

        let above_cap = RetryConfig {
            backoff_factor: 60.0,
            max_interval: Duration::from_secs(30),
            ..RetryConfig::default()
        };
        assert!(above_cap.validate().is_err());

        let endless_growth = RetryConfig {
            multiplier: f64::INFINITY,
            ..RetryConfig::default()
        };
        assert!(endless_growth.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unvalidated_huge_factor_is_clamped() {
        let retry = RetryExecutor::new(RetryConfig {
            max_retries: 1,
            backoff_factor: 1e30,
            max_interval: Duration::from_secs(3),
            randomization_factor: 0.0,
            ..RetryConfig::default()
        });

        let start = Instant::now();
        let result: Result<()> = retry
            .execute(None, || async { Err(ServiceError::network("reset")) })
            .await;

        assert!(result.is_err());
        assert!(start.elapsed() <= Duration::from_secs(3));
    }
}
