//! # Guard SDK
//!
//! Resilience and observability for outbound calls to unreliable services
//! (HTTP APIs, SQL warehouses).
//!
//! This crate provides:
//!
//! - Failure classification into a closed set of kinds
//! - Resilience patterns (circuit breaker, minimum-interval rate limiting,
//!   bounded retry with backoff)
//! - A per-service health monitor emitting structured events and alerts
//! - A composition root, [`GuardedCaller`], that wires them together
//!
//! ## Architecture
//!
//! A call flows one way:
//!
//! ```text
//! caller -> GuardedCaller -> rate limiter -> circuit breaker
//!        -> retrying client -> transport -> remote
//!        -> outcome -> ServiceMonitor -> event sink
//! ```
//!
//! Nothing here is global. Each guarded resource owns its breaker; monitors
//! and rate limiters can be shared between guards by `Arc`.

pub mod classifier;
pub use classifier::{classify, FailureKind};

pub mod error;
pub use error::{ErrorContext, GuardError, Result, ServiceError};

pub mod resilience;
pub use resilience::{BreakerState, CircuitBreaker, RateLimiter, RetryExecutor};

pub mod monitor;
pub use monitor::{EventFormat, EventSink, ServiceMonitor};

pub mod transport;
pub use transport::{HttpTransport, RetryingClient, Transport, TransportRequest};

pub mod guard;
pub use guard::{CallOptions, Fallback, GuardBuilder, Guarded, GuardedCaller};

pub mod config;
pub use config::{ConfigProvider, GuardConfig};

pub mod logging;

mod util;

#[cfg(test)]
mod tests;

/// Start building a guard for `resource`
pub fn guard(resource: impl Into<String>) -> GuardBuilder {
    GuardBuilder::new(resource)
}
