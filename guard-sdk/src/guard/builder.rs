//! Builder for [`GuardedCaller`]
//!
//! Anything not supplied is constructed fresh from its configuration. Shared
//! instances (a monitor or rate limiter used by several guards) are passed in
//! by `Arc`.

use std::sync::Arc;
use std::time::Duration;

use super::GuardedCaller;
use crate::config::GuardConfig;
use crate::error::Result;
use crate::monitor::{EventFormat, EventSink, MonitorConfig, ServiceMonitor, TracingSink};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig, RetryConfig};
use crate::transport::{RetryingClient, Transport};

/// Builder for a guarded resource
pub struct GuardBuilder {
    resource: String,
    service_name: Option<String>,
    breaker_config: CircuitBreakerConfig,
    monitor_config: MonitorConfig,
    rate_limit_config: RateLimiterConfig,
    retry_config: RetryConfig,
    timeout: Option<Duration>,
    event_format: EventFormat,
    sink: Option<Arc<dyn EventSink>>,
    monitor: Option<Arc<ServiceMonitor>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    transport: Option<Arc<dyn Transport>>,
}

impl GuardBuilder {
    /// Builder for `resource` with default settings
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            service_name: None,
            breaker_config: CircuitBreakerConfig::default(),
            monitor_config: MonitorConfig::default(),
            rate_limit_config: RateLimiterConfig::default(),
            retry_config: RetryConfig::default(),
            timeout: Some(Duration::from_secs(20)),
            event_format: EventFormat::from_env(),
            sink: None,
            monitor: None,
            rate_limiter: None,
            transport: None,
        }
    }

    /// Apply every section of a loaded configuration
    pub fn config(mut self, config: &GuardConfig) -> Self {
        self.breaker_config = config.breaker.clone();
        self.monitor_config = config.monitor.clone();
        self.rate_limit_config = config.rate_limit.clone();
        self.retry_config = config.retry.clone();
        self.timeout = Some(config.request_timeout);
        self.event_format = config.event_format;
        self
    }

    /// Service name used by the monitor; defaults to the resource
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limit_config = config;
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Default deadline for calls that do not set their own
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Let calls run without a default deadline
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Where the monitor writes its records
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share an existing monitor instead of creating one
    pub fn monitor(mut self, monitor: Arc<ServiceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Share an existing rate limiter instead of creating one
    pub fn rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Transport used by `call_http`
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate the configuration and assemble the guard
    pub fn build(self) -> Result<GuardedCaller> {
        self.breaker_config.validate()?;
        self.rate_limit_config.validate()?;
        self.retry_config.validate()?;

        let monitor = match self.monitor {
            Some(monitor) => monitor,
            None => {
                self.monitor_config.validate()?;
                let format = self.event_format;
                let sink = self
                    .sink
                    .unwrap_or_else(|| Arc::new(TracingSink::new(format)) as Arc<dyn EventSink>);
                let name = self.service_name.unwrap_or_else(|| self.resource.clone());
                Arc::new(ServiceMonitor::new(name, self.monitor_config, sink))
            }
        };

        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::new(self.rate_limit_config)));

        let client = self
            .transport
            .map(|transport| RetryingClient::new(self.resource.clone(), transport, self.retry_config));

        log::debug!(
            "Guard for {} ready (breaker threshold {}, open timeout {:?})",
            self.resource,
            self.breaker_config.failure_threshold,
            self.breaker_config.open_timeout
        );

        Ok(GuardedCaller {
            breaker: Arc::new(CircuitBreaker::new(self.resource.clone(), self.breaker_config)),
            resource: self.resource,
            monitor,
            rate_limiter,
            client,
            default_timeout: self.timeout,
        })
    }
}
