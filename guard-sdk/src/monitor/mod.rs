//! Per-service health monitor
//!
//! Aggregates attempt outcomes for one logical service: consecutive failure
//! streak, lifetime counters and a sliding failure-rate window. Every outcome
//! is emitted as a structured record through an [`EventSink`], followed by any
//! alerts it triggers.
//!
//! Alerts are edge-triggered. `CONSECUTIVE_FAILURES` fires on the failure that
//! brings the streak to the threshold and re-arms on the next success.
//! `HIGH_FAILURE_RATE` fires when the window condition becomes true and re-arms
//! once it is false again.

mod events;
mod window;

pub use events::{
    Alert, AlertDetails, AttemptContext, EventFormat, EventSink, FailureDetail, FailureMetrics,
    FailureStats, MonitorRecord, RecordingSink, ServiceEvent, Severity, StartStats, SuccessMetrics,
    SuccessStats, ThresholdSummary, TracingSink,
};
pub use window::SlidingWindow;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::classifier::FailureKind;
use crate::error::{Result, ServiceError};
use crate::util::{duration_ms, truncate_chars, unix_millis};

/// Longest error message carried by a failure record
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

const RECOVERY_STATUS: &str = "Service is responding normally";

/// Alert thresholds and window sizing
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Streak length that raises the CRITICAL alert
    pub consecutive_failure_threshold: u32,

    /// Window failure rate that raises the WARNING alert
    pub failure_rate_threshold: f64,

    /// Number of recent outcomes kept in the window
    pub window_size: usize,

    /// Samples the window needs before the rate alert is considered
    pub min_window_samples: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 3,
            failure_rate_threshold: 0.8,
            window_size: 10,
            min_window_samples: 5,
        }
    }
}

impl MonitorConfig {
    /// Validate this configuration
    pub fn validate(&self) -> Result<()> {
        if self.consecutive_failure_threshold == 0 {
            return Err(ServiceError::configuration(
                "consecutive_failure_threshold must be greater than 0",
            ));
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(ServiceError::configuration(
                "failure_rate_threshold must be within (0, 1]",
            ));
        }
        if self.window_size == 0 {
            return Err(ServiceError::configuration("window_size must be greater than 0"));
        }
        if self.min_window_samples > self.window_size {
            return Err(ServiceError::configuration(
                "min_window_samples cannot exceed window_size",
            ));
        }
        Ok(())
    }
}

/// Retry position of a failed attempt, as reported in the failure record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryInfo {
    pub retry_attempt: u32,
    pub max_retries: u32,
}

impl Default for RetryInfo {
    fn default() -> Self {
        Self {
            retry_attempt: 0,
            max_retries: 3,
        }
    }
}

/// An attempt that has started and not yet been finalized.
///
/// Finalizing consumes it, so every attempt is recorded exactly once.
#[must_use = "finalize the attempt with record_success() or record_failure()"]
#[derive(Debug)]
pub struct PendingAttempt {
    request_id: String,
    timestamp: DateTime<Utc>,
    operation: String,
    resource: String,
    context: AttemptContext,
    timeout_seconds: Option<u64>,
    started: Instant,
}

impl PendingAttempt {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Time since the attempt started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure,
}

/// A finalized attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub operation: String,
    pub resource: String,
    pub context: AttemptContext,
    pub timeout_seconds: Option<u64>,
    pub outcome: Outcome,
    pub failure_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    pub latency_ms: u64,
    pub retry_attempt: u32,
    pub max_retries: u32,
}

/// Point-in-time view of the monitor counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub service: String,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub total_failures: u64,
    pub rejected: u64,
    pub failure_rate: f64,
    pub window_len: usize,
    pub last_success_time: Option<DateTime<Utc>>,
    pub in_downtime: bool,
}

#[derive(Debug)]
struct MonitorState {
    consecutive_failures: u32,
    total_attempts: u64,
    total_failures: u64,
    rejected: u64,
    window: SlidingWindow,
    last_success_time: Option<DateTime<Utc>>,
    downtime_start: Option<Instant>,
    rate_alert_active: bool,
}

/// Health monitor for one logical service
pub struct ServiceMonitor {
    service_name: String,
    alert_prefix: String,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    sequence: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ServiceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMonitor")
            .field("service_name", &self.service_name)
            .field("config", &self.config)
            .finish()
    }
}

impl ServiceMonitor {
    /// Create a monitor and announce it with `MONITOR_INITIALIZED`
    pub fn new(service_name: impl Into<String>, config: MonitorConfig, sink: Arc<dyn EventSink>) -> Self {
        let service_name = service_name.into();
        let alert_prefix = service_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();

        let monitor = Self {
            alert_prefix,
            state: Mutex::new(MonitorState {
                consecutive_failures: 0,
                total_attempts: 0,
                total_failures: 0,
                rejected: 0,
                window: SlidingWindow::new(config.window_size),
                last_success_time: None,
                downtime_start: None,
                rate_alert_active: false,
            }),
            sequence: AtomicU64::new(0),
            sink,
            config,
            service_name,
        };

        monitor.emit(ServiceEvent::MonitorInitialized {
            timestamp: Utc::now(),
            service: monitor.service_name.clone(),
            component: "service_monitor".to_string(),
            thresholds: ThresholdSummary {
                consecutive_failure: monitor.config.consecutive_failure_threshold,
                failure_rate: monitor.config.failure_rate_threshold,
            },
        });

        monitor
    }

    /// Monitor with default thresholds writing through `tracing`
    pub fn with_defaults(service_name: impl Into<String>) -> Self {
        Self::new(
            service_name,
            MonitorConfig::default(),
            Arc::new(TracingSink::new(EventFormat::from_env())),
        )
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Begin an attempt and emit `REQUEST_START`
    pub fn start_attempt(
        &self,
        operation: impl Into<String>,
        resource: impl Into<String>,
        context: AttemptContext,
        timeout: Option<Duration>,
    ) -> PendingAttempt {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let attempt = PendingAttempt {
            request_id: format!("req_{}_{}", unix_millis(), seq),
            timestamp: Utc::now(),
            operation: operation.into(),
            resource: resource.into(),
            context,
            timeout_seconds: timeout.map(|t| t.as_secs()),
            started: Instant::now(),
        };

        let stats = {
            let state = self.state.lock();
            StartStats {
                consecutive_failures: state.consecutive_failures,
                total_attempts: state.total_attempts,
            }
        };

        self.emit(ServiceEvent::RequestStart {
            request_id: attempt.request_id.clone(),
            timestamp: attempt.timestamp,
            service: self.service_name.clone(),
            operation: attempt.operation.clone(),
            resource: attempt.resource.clone(),
            context: attempt.context.clone(),
            timeout: attempt.timeout_seconds,
            stats,
        });

        attempt
    }

    /// Finalize an attempt as successful.
    ///
    /// Closes an open downtime streak, in which case `SERVICE_RECOVERY` is
    /// emitted ahead of `REQUEST_SUCCESS`.
    pub fn record_success(&self, attempt: PendingAttempt, response_size: Option<usize>) -> AttemptRecord {
        let latency = attempt.elapsed();
        let now = Utc::now();

        let (downtime, total_attempts, failure_rate) = {
            let mut state = self.state.lock();
            state.consecutive_failures = 0;
            state.total_attempts += 1;
            state.last_success_time = Some(now);
            state.window.push(true);
            let downtime = state.downtime_start.take().map(|start| start.elapsed());
            let failure_rate = state.window.failure_rate();
            if !self.rate_condition(&state.window) {
                state.rate_alert_active = false;
            }
            (downtime, state.total_attempts, failure_rate)
        };

        if let Some(downtime) = downtime {
            self.emit(ServiceEvent::ServiceRecovery {
                timestamp: now,
                service: self.service_name.clone(),
                downtime_duration_seconds: downtime.as_secs_f64(),
                status: RECOVERY_STATUS.to_string(),
            });
        }

        self.emit(ServiceEvent::RequestSuccess {
            request_id: attempt.request_id.clone(),
            timestamp: now,
            service: self.service_name.clone(),
            operation: attempt.operation.clone(),
            resource: attempt.resource.clone(),
            metrics: SuccessMetrics {
                response_time_ms: duration_ms(latency),
                response_size_bytes: response_size,
            },
            stats: SuccessStats {
                total_attempts,
                failure_rate,
            },
        });

        AttemptRecord {
            timestamp: attempt.timestamp,
            request_id: attempt.request_id,
            operation: attempt.operation,
            resource: attempt.resource,
            context: attempt.context,
            timeout_seconds: attempt.timeout_seconds,
            outcome: Outcome::Success,
            failure_kind: None,
            error_message: None,
            latency_ms: duration_ms(latency),
            retry_attempt: 0,
            max_retries: 0,
        }
    }

    /// Finalize an attempt as failed, then evaluate alert thresholds
    pub fn record_failure(
        &self,
        attempt: PendingAttempt,
        kind: FailureKind,
        message: &str,
        retry: RetryInfo,
    ) -> AttemptRecord {
        let latency = attempt.elapsed();
        let now = Utc::now();
        let message = truncate_chars(message, MAX_ERROR_MESSAGE_CHARS);

        let (stats, critical, warning) = {
            let mut state = self.state.lock();
            state.consecutive_failures += 1;
            state.total_attempts += 1;
            state.total_failures += 1;
            if state.consecutive_failures == 1 {
                state.downtime_start = Some(Instant::now());
            }
            state.window.push(false);

            let failure_rate = state.window.failure_rate();
            let critical = state.consecutive_failures == self.config.consecutive_failure_threshold;
            let warning = if self.rate_condition(&state.window) {
                !std::mem::replace(&mut state.rate_alert_active, true)
            } else {
                state.rate_alert_active = false;
                false
            };

            let stats = FailureStats {
                consecutive_failures: state.consecutive_failures,
                total_failures: state.total_failures,
                failure_rate,
            };
            (stats, critical, warning)
        };

        self.emit(ServiceEvent::RequestFailure {
            request_id: attempt.request_id.clone(),
            timestamp: now,
            service: self.service_name.clone(),
            operation: attempt.operation.clone(),
            resource: attempt.resource.clone(),
            error: FailureDetail {
                kind,
                message: message.clone(),
                retry_attempt: retry.retry_attempt,
                max_retries: retry.max_retries,
            },
            metrics: FailureMetrics {
                response_time_ms: duration_ms(latency),
            },
            stats: stats.clone(),
        });

        if critical {
            self.emit(Alert {
                alert: format!("{}_CONSECUTIVE_FAILURES", self.alert_prefix),
                severity: Severity::Critical,
                timestamp: now,
                details: AlertDetails::ConsecutiveFailures {
                    count: stats.consecutive_failures,
                    threshold: self.config.consecutive_failure_threshold,
                    last_error: kind,
                },
            });
        }

        if warning {
            self.emit(Alert {
                alert: format!("{}_HIGH_FAILURE_RATE", self.alert_prefix),
                severity: Severity::Warning,
                timestamp: now,
                details: AlertDetails::HighFailureRate {
                    rate: stats.failure_rate,
                    threshold: self.config.failure_rate_threshold,
                },
            });
        }

        AttemptRecord {
            timestamp: attempt.timestamp,
            request_id: attempt.request_id,
            operation: attempt.operation,
            resource: attempt.resource,
            context: attempt.context,
            timeout_seconds: attempt.timeout_seconds,
            outcome: Outcome::Failure,
            failure_kind: Some(kind),
            error_message: Some(message),
            latency_ms: duration_ms(latency),
            retry_attempt: retry.retry_attempt,
            max_retries: retry.max_retries,
        }
    }

    /// Account a call the circuit breaker refused.
    ///
    /// Only the rejected counter moves; the streak, window and attempt totals
    /// describe real calls.
    pub fn record_rejection(&self, operation: &str, resource: &str, retry_in: Duration) {
        let rejected_total = {
            let mut state = self.state.lock();
            state.rejected += 1;
            state.rejected
        };

        self.emit(ServiceEvent::RequestRejected {
            timestamp: Utc::now(),
            service: self.service_name.clone(),
            operation: operation.to_string(),
            resource: resource.to_string(),
            retry_in_ms: duration_ms(retry_in),
            rejected_total,
        });
    }

    /// Failure rate over the sliding window
    pub fn failure_rate(&self) -> f64 {
        self.state.lock().window.failure_rate()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let state = self.state.lock();
        MonitorSnapshot {
            service: self.service_name.clone(),
            consecutive_failures: state.consecutive_failures,
            total_attempts: state.total_attempts,
            total_failures: state.total_failures,
            rejected: state.rejected,
            failure_rate: state.window.failure_rate(),
            window_len: state.window.len(),
            last_success_time: state.last_success_time,
            in_downtime: state.downtime_start.is_some(),
        }
    }

    fn rate_condition(&self, window: &SlidingWindow) -> bool {
        window.len() >= self.config.min_window_samples
            && window.failure_rate() >= self.config.failure_rate_threshold
    }

    fn emit(&self, record: impl Into<MonitorRecord>) {
        self.sink.emit(&record.into());
    }
}
