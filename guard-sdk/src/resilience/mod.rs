//! Resilience patterns for guarded calls
//!
//! This module provides:
//! - Circuit breaker (per guarded resource)
//! - Minimum-interval rate limiting (per resource/operation key)
//! - Retry with exponential backoff on an allow-list of failures

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{
    BreakerError, BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitOpen,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryConfig, RetryExecutor};

use serde::Serialize;

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Circuit is closed, allowing requests
    Closed,

    /// Circuit is open, rejecting requests
    Open,

    /// Circuit is half-open, allowing a single trial request
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}
