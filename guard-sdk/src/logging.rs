//! Structured logging setup
//!
//! Installs a global `tracing` subscriber. Records emitted through the `log`
//! crate are bridged into it, so breaker and retry diagnostics land next to
//! the monitor's events.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::{Result, ServiceError};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json_format: bool,
    /// Include the record target (module path or `service_monitor`)
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: std::env::var_os("K_SERVICE").is_some(),
            with_target: true,
        }
    }
}

/// Initialize logging. Later calls are no-ops.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
            ServiceError::configuration(format!("Invalid log level '{}': {}", config.level, e))
        })?;

    let json_layer = config
        .json_format
        .then(|| fmt::layer().json().flatten_event(true).with_target(config.with_target));
    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(config.with_target));

    Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| ServiceError::configuration(format!("Failed to set global subscriber: {}", e)))?;

    tracing::debug!(json = config.json_format, level = %config.level, "Logging initialized");
    Ok(())
}

/// Whether [`init_logging`] has run
pub fn is_initialized() -> bool {
    LOGGING_INITIALIZED.load(Ordering::SeqCst)
}
