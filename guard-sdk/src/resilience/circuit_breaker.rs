//! Circuit breaker implementation for preventing cascading failures
//!
//! One breaker guards one resource. All state lives behind a single mutex so
//! concurrent callers never lose a failure count update, and the lock is never
//! held across the guarded call itself.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use super::BreakerState;
use crate::error::ServiceError;

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call is allowed
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Defaults for a generic HTTP endpoint
    pub fn http() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }

    /// Reject configurations that could never open or never recover
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.failure_threshold == 0 {
            return Err(ServiceError::configuration(
                "breaker failure_threshold must be at least 1",
            ));
        }
        if self.open_timeout.is_zero() {
            return Err(ServiceError::configuration(
                "breaker open_timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Rejection returned while the circuit is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Circuit breaker is OPEN - resource temporarily unavailable (next trial in {retry_in:?})")]
pub struct CircuitOpen {
    /// Time left until a trial call will be admitted
    pub retry_in: Duration,
}

/// Outcome of `CircuitBreaker::call`
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation
    #[error(transparent)]
    Open(CircuitOpen),

    /// The operation ran and failed
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// A thread-safe circuit breaker for a single resource
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the specified configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
            config,
        }
    }

    /// Name of the guarded resource
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask for permission to call the resource.
    ///
    /// While open and inside the timeout this fails fast. Once the timeout has
    /// elapsed the first caller moves the breaker to half-open and receives the
    /// single trial permit; everyone else keeps getting rejected until the trial
    /// resolves.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, CircuitOpen> {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => Ok(BreakerPermit::new(self, false)),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.open_timeout);

                if elapsed >= self.config.open_timeout {
                    log::info!("Circuit breaker '{}' moving to HALF_OPEN state", self.name);
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(CircuitOpen {
                        retry_in: self.config.open_timeout - elapsed,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(CircuitOpen {
                        retry_in: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                }
            }
        }
    }

    /// Run an operation under breaker protection
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().map_err(BreakerError::Open)?;

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                permit.failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Record a successful request
    pub fn record_success(&self) {
        self.apply(true, true);
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        self.apply(false, true);
    }

    /// Apply one call outcome. Only the trial call may decide a half-open
    /// circuit; stragglers admitted while closed are ignored there.
    fn apply(&self, success: bool, resolves_trial: bool) {
        let mut inner = self.inner.lock();

        match (inner.state, success) {
            (BreakerState::Closed, true) => {
                inner.failure_count = 0;
                inner.last_failure = None;
            }
            (BreakerState::Closed, false) => {
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());

                if inner.failure_count >= self.config.failure_threshold {
                    log::warn!(
                        "Circuit breaker '{}' OPEN after {} failures",
                        self.name,
                        inner.failure_count
                    );
                    inner.state = BreakerState::Open;
                }
            }
            (BreakerState::HalfOpen, _) if !resolves_trial => {
                log::debug!("Circuit breaker '{}' ignoring non-trial outcome while HALF_OPEN", self.name);
            }
            (BreakerState::HalfOpen, true) => {
                log::info!("Circuit breaker '{}' reset to CLOSED state", self.name);
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.last_failure = None;
                inner.trial_in_flight = false;
            }
            (BreakerState::HalfOpen, false) => {
                log::warn!("Circuit breaker '{}' trial call failed, back to OPEN", self.name);
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());
                inner.state = BreakerState::Open;
                inner.trial_in_flight = false;
            }
            (BreakerState::Open, _) => {
                // Admitted before the circuit opened; the trial decides recovery
                log::debug!("Circuit breaker '{}' ignoring late outcome while OPEN", self.name);
            }
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
    }

    /// Get the current circuit state
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Get the current number of consecutive failures
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Get the breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Point-in-time view of the breaker
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            since_last_failure: inner.last_failure.map(|at| at.elapsed()),
            config: self.config.clone(),
        }
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Permission to make one call through the breaker.
///
/// Consume it with `success()` or `failure()`. A permit dropped without an
/// outcome (e.g. the call was cancelled) leaves the counters alone and, if it
/// was the half-open trial, frees the trial slot for the next caller.
#[must_use = "report the outcome with success() or failure()"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this permit is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Report a successful call
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.apply(true, self.trial);
    }

    /// Report a failed call
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.apply(false, self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Snapshot of a circuit breaker
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    /// Current state
    pub state: BreakerState,

    /// Current failure count
    pub failure_count: u32,

    /// Time since the last recorded failure, if any
    pub since_last_failure: Option<Duration>,

    /// Current configuration
    pub config: CircuitBreakerConfig,
}
