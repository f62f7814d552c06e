//! Minimum-interval rate limiting
//!
//! Advisory spacing per key: each key remembers when its last request was let
//! through, and a new request waits until `min_interval` has passed since
//! then. This is not a token bucket; it guarantees a gap, nothing more.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{Result, ServiceError};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Gap enforced for keys without an override
    pub min_interval: Duration,

    /// Per-key gaps
    pub overrides: HashMap<String, Duration>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            overrides: HashMap::new(),
        }
    }
}

impl RateLimiterConfig {
    /// Configuration with the given default gap
    pub fn with_min_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            ..Self::default()
        }
    }

    /// Set the gap for one key
    pub fn interval_for(mut self, key: impl Into<String>, interval: Duration) -> Self {
        self.overrides.insert(key.into(), interval);
        self
    }

    /// Validate this configuration
    pub fn validate(&self) -> Result<()> {
        if self.min_interval > Duration::from_secs(3600) {
            return Err(ServiceError::configuration(
                "rate limit min_interval above one hour is almost certainly a unit mistake",
            ));
        }
        Ok(())
    }
}

/// Per-key minimum-interval gate
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Build the key used for a resource/operation pair
    pub fn key(resource: &str, operation: &str) -> String {
        format!("{}:{}", resource, operation)
    }

    /// Gap enforced for `key`
    pub fn interval(&self, key: &str) -> Duration {
        self.config
            .overrides
            .get(key)
            .copied()
            .unwrap_or(self.config.min_interval)
    }

    /// Wait until `key` may issue another request, then claim the slot.
    ///
    /// The slot is reserved under the lock before sleeping, so concurrent
    /// callers on the same key queue up one interval apart instead of all
    /// waking at once. Returns how long the caller waited.
    pub async fn acquire(&self, key: &str) -> Duration {
        let interval = self.interval(key);
        let now = Instant::now();

        let slot = {
            let mut last = self.last_request.lock();
            let slot = match last.get(key) {
                Some(prev) => (*prev + interval).max(now),
                None => now,
            };
            last.insert(key.to_string(), slot);
            slot
        };

        let wait = slot.saturating_duration_since(now);
        if !wait.is_zero() {
            log::info!("Rate limiting: waiting {:.1}s before {}", wait.as_secs_f64(), key);
            tokio::time::sleep_until(slot).await;
        }
        wait
    }

    /// Number of keys seen so far
    pub fn tracked_keys(&self) -> usize {
        self.last_request.lock().len()
    }
}
