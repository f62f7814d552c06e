//! Configuration management for guarded resources
//!
//! Values come from a [`ConfigProvider`] (environment, memory, or a chain of
//! both) and are assembled into a validated [`GuardConfig`]. Missing keys fall
//! back to defaults; present but malformed values are errors.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{Result, ServiceError};
use crate::monitor::{EventFormat, MonitorConfig};
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use crate::util::parse_duration;

/// Base trait for configuration providers
pub trait ConfigProvider: Send + Sync {
    /// Get a string configuration value
    fn get_string(&self, key: &str) -> Result<String>;
}

/// Extension methods for configuration providers
pub trait ConfigProviderExt: ConfigProvider {
    /// Get an integer configuration value
    fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<i64>()
            .map_err(|e| ServiceError::configuration(format!("Invalid integer for key {}: {}", key, e)))
    }

    /// Get a float configuration value
    fn get_float(&self, key: &str) -> Result<f64> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| ServiceError::configuration(format!("Invalid float for key {}: {}", key, e)))
    }

    /// Get a duration ("250ms", "30s", "5m", "1h" or bare seconds)
    fn get_duration(&self, key: &str) -> Result<Duration> {
        let value = self.get_string(key)?;
        parse_duration(&value)
            .ok_or_else(|| ServiceError::configuration(format!("Invalid duration for key {}: {}", key, value)))
    }

    /// Get a comma separated list of status codes
    fn get_status_list(&self, key: &str) -> Result<Vec<u16>> {
        let value = self.get_string(key)?;
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u16>()
                    .map_err(|e| ServiceError::configuration(format!("Invalid status '{}' for key {}: {}", s, key, e)))
            })
            .collect()
    }

    /// Whether the provider has a value for `key`
    fn contains(&self, key: &str) -> bool {
        self.get_string(key).is_ok()
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

/// Environment variable based configuration provider
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    /// Optional prefix for environment variables
    prefix: Option<String>,

    /// Optional namespace for variables (e.g., "WAREHOUSE")
    namespace: Option<String>,
}

impl EnvConfigProvider {
    /// Create a new environment variable config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a prefix for environment variables
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set a namespace for environment variables
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Format a configuration key as an environment variable
    pub(crate) fn format_key(&self, key: &str) -> String {
        let mut env_key = String::new();

        if let Some(ref prefix) = self.prefix {
            env_key.push_str(prefix);
            env_key.push('_');
        }

        if let Some(ref namespace) = self.namespace {
            env_key.push_str(&namespace.to_uppercase());
            env_key.push('_');
        }

        env_key.push_str(&key.to_uppercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_"));

        env_key
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        let env_key = self.format_key(key);

        env::var(&env_key).map_err(|e| match e {
            env::VarError::NotPresent => {
                ServiceError::configuration(format!("Environment variable not set: {}", env_key))
            }
            env::VarError::NotUnicode(_) => ServiceError::configuration(format!(
                "Environment variable is not valid unicode: {}",
                env_key
            )),
        })
    }
}

/// In-memory config provider for testing or static configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigProvider {
    values: HashMap<String, String>,
}

impl MemoryConfigProvider {
    /// Create a new empty memory config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory config provider with initial values
    pub fn with_values(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Set a configuration value
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.values.insert(key.into(), value.to_string());
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| ServiceError::configuration(format!("Configuration key not found: {}", key)))
    }
}

/// A composite config provider that tries multiple providers in order
#[derive(Default)]
pub struct CompositeConfigProvider {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    /// Create a new composite config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider to the end of the chain
    pub fn add_provider(&mut self, provider: impl ConfigProvider + 'static) {
        self.providers.push(Box::new(provider));
    }

    /// Builder-style [`add_provider`](Self::add_provider)
    pub fn with_provider(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.add_provider(provider);
        self
    }
}

impl ConfigProvider for CompositeConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        for provider in &self.providers {
            if let Ok(value) = provider.get_string(key) {
                return Ok(value);
            }
        }

        Err(ServiceError::configuration(format!(
            "Configuration key not found in any provider: {}",
            key
        )))
    }
}

/// Read `key` with `read`, using `default` only when the key is absent
fn optional<P, T>(provider: &P, key: &str, default: T, read: impl FnOnce(&P, &str) -> Result<T>) -> Result<T>
where
    P: ConfigProvider + ?Sized,
{
    if provider.contains(key) {
        read(provider, key)
    } else {
        Ok(default)
    }
}

fn non_negative<T: TryFrom<i64>>(key: &str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| ServiceError::configuration(format!("Value out of range for key {}: {}", key, value)))
}

/// Complete configuration for one guarded resource
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub monitor: MonitorConfig,
    pub breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimiterConfig,
    pub retry: RetryConfig,

    /// Default overall deadline per call
    pub request_timeout: Duration,

    pub event_format: EventFormat,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(20),
            event_format: EventFormat::from_env(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from a config provider
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let defaults = Self::default();

        let monitor = MonitorConfig {
            consecutive_failure_threshold: optional(
                provider,
                "consecutive_failure_threshold",
                defaults.monitor.consecutive_failure_threshold,
                |p, k| non_negative(k, p.get_int(k)?),
            )?,
            failure_rate_threshold: optional(
                provider,
                "failure_rate_threshold",
                defaults.monitor.failure_rate_threshold,
                |p, k| p.get_float(k),
            )?,
            window_size: optional(provider, "window_size", defaults.monitor.window_size, |p, k| {
                non_negative(k, p.get_int(k)?)
            })?,
            min_window_samples: optional(
                provider,
                "min_window_samples",
                defaults.monitor.min_window_samples,
                |p, k| non_negative(k, p.get_int(k)?),
            )?,
        };

        let breaker = CircuitBreakerConfig {
            failure_threshold: optional(
                provider,
                "breaker_failure_threshold",
                defaults.breaker.failure_threshold,
                |p, k| non_negative(k, p.get_int(k)?),
            )?,
            open_timeout: optional(
                provider,
                "breaker_open_timeout",
                defaults.breaker.open_timeout,
                |p, k| p.get_duration(k),
            )?,
        };

        let rate_limit = RateLimiterConfig::with_min_interval(optional(
            provider,
            "rate_limit_min_interval",
            defaults.rate_limit.min_interval,
            |p, k| p.get_duration(k),
        )?);

        let retry = RetryConfig {
            max_retries: optional(provider, "retry_max_retries", defaults.retry.max_retries, |p, k| {
                non_negative(k, p.get_int(k)?)
            })?,
            backoff_factor: optional(
                provider,
                "retry_backoff_factor",
                defaults.retry.backoff_factor,
                |p, k| p.get_float(k),
            )?,
            retryable_statuses: optional(
                provider,
                "retry_statuses",
                defaults.retry.retryable_statuses.clone(),
                |p, k| p.get_status_list(k),
            )?,
            ..defaults.retry.clone()
        };

        let request_timeout = optional(provider, "request_timeout", defaults.request_timeout, |p, k| {
            p.get_duration(k)
        })?;

        let event_format = optional(provider, "event_format", defaults.event_format, |p, k| {
            p.get_string(k)?.parse()
        })?;

        let config = Self {
            monitor,
            breaker,
            rate_limit,
            retry,
            request_timeout,
            event_format,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from `GUARD_{NAMESPACE}_{KEY}` environment variables
    pub fn from_env(namespace: &str) -> Result<Self> {
        Self::from_provider(&EnvConfigProvider::new().with_prefix("GUARD").with_namespace(namespace))
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.monitor.validate()?;
        self.breaker.validate()?;
        self.rate_limit.validate()?;
        self.retry.validate()?;
        if self.request_timeout.is_zero() {
            return Err(ServiceError::configuration("request_timeout must be greater than 0"));
        }
        Ok(())
    }
}
