//! Structured monitor events and the sinks that receive them
//!
//! Every record is a flat serde-serializable value. Log consumers key on the
//! `event` field for lifecycle records and on the `alert` field for alerts.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::classifier::FailureKind;
use crate::error::ServiceError;

/// Opaque diagnostics attached to an attempt
pub type AttemptContext = BTreeMap<String, serde_json::Value>;

/// Alert thresholds echoed in the initialization event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSummary {
    pub consecutive_failure: u32,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartStats {
    pub consecutive_failures: u32,
    pub total_attempts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessMetrics {
    pub response_time_ms: u64,
    pub response_size_bytes: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessStats {
    pub total_attempts: u64,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureDetail {
    #[serde(rename = "type")]
    pub kind: FailureKind,
    pub message: String,
    pub retry_attempt: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureMetrics {
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureStats {
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub failure_rate: f64,
}

/// Lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEvent {
    MonitorInitialized {
        timestamp: DateTime<Utc>,
        service: String,
        component: String,
        thresholds: ThresholdSummary,
    },
    RequestStart {
        request_id: String,
        timestamp: DateTime<Utc>,
        service: String,
        operation: String,
        resource: String,
        context: AttemptContext,
        timeout: Option<u64>,
        stats: StartStats,
    },
    RequestSuccess {
        request_id: String,
        timestamp: DateTime<Utc>,
        service: String,
        operation: String,
        resource: String,
        metrics: SuccessMetrics,
        stats: SuccessStats,
    },
    RequestFailure {
        request_id: String,
        timestamp: DateTime<Utc>,
        service: String,
        operation: String,
        resource: String,
        error: FailureDetail,
        metrics: FailureMetrics,
        stats: FailureStats,
    },
    RequestRejected {
        timestamp: DateTime<Utc>,
        service: String,
        operation: String,
        resource: String,
        retry_in_ms: u64,
        rejected_total: u64,
    },
    ServiceRecovery {
        timestamp: DateTime<Utc>,
        service: String,
        downtime_duration_seconds: f64,
        status: String,
    },
}

impl ServiceEvent {
    /// Value of the `event` field
    pub fn name(&self) -> &'static str {
        match self {
            ServiceEvent::MonitorInitialized { .. } => "MONITOR_INITIALIZED",
            ServiceEvent::RequestStart { .. } => "REQUEST_START",
            ServiceEvent::RequestSuccess { .. } => "REQUEST_SUCCESS",
            ServiceEvent::RequestFailure { .. } => "REQUEST_FAILURE",
            ServiceEvent::RequestRejected { .. } => "REQUEST_REJECTED",
            ServiceEvent::ServiceRecovery { .. } => "SERVICE_RECOVERY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AlertDetails {
    ConsecutiveFailures {
        count: u32,
        threshold: u32,
        last_error: FailureKind,
    },
    HighFailureRate {
        rate: f64,
        threshold: f64,
    },
}

/// Threshold alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// `{SERVICE}_{ALERT_NAME}`
    pub alert: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub details: AlertDetails,
}

/// Anything the monitor emits
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MonitorRecord {
    Event(ServiceEvent),
    Alert(Alert),
}

impl MonitorRecord {
    /// The `event` or `alert` value consumers key on
    pub fn key(&self) -> &str {
        match self {
            MonitorRecord::Event(event) => event.name(),
            MonitorRecord::Alert(alert) => &alert.alert,
        }
    }

    /// Render according to `format`
    pub fn render(&self, format: EventFormat) -> String {
        let rendered = match format {
            EventFormat::Compact => serde_json::to_string(self),
            EventFormat::Expanded => serde_json::to_string_pretty(self),
        };
        rendered.unwrap_or_else(|e| format!("{{\"render_error\":\"{}\",\"key\":\"{}\"}}", e, self.key()))
    }
}

impl From<ServiceEvent> for MonitorRecord {
    fn from(event: ServiceEvent) -> Self {
        MonitorRecord::Event(event)
    }
}

impl From<Alert> for MonitorRecord {
    fn from(alert: Alert) -> Self {
        MonitorRecord::Alert(alert)
    }
}

/// Rendering mode for emitted records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFormat {
    /// Single-line JSON, for log aggregators
    #[default]
    Compact,
    /// Indented JSON, for humans at a terminal
    Expanded,
}

impl EventFormat {
    /// Compact inside a managed container runtime (`K_SERVICE` set), expanded otherwise
    pub fn from_env() -> Self {
        if std::env::var_os("K_SERVICE").is_some() {
            EventFormat::Compact
        } else {
            EventFormat::Expanded
        }
    }
}

impl FromStr for EventFormat {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compact" | "json" => Ok(EventFormat::Compact),
            "expanded" | "pretty" => Ok(EventFormat::Expanded),
            other => Err(ServiceError::configuration(format!("Unknown event format: {}", other))),
        }
    }
}

/// Receiver of monitor records
pub trait EventSink: Send + Sync {
    fn emit(&self, record: &MonitorRecord);
}

/// Sink that writes records through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    format: EventFormat,
}

impl TracingSink {
    pub fn new(format: EventFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> EventFormat {
        self.format
    }
}

impl EventSink for TracingSink {
    fn emit(&self, record: &MonitorRecord) {
        let line = record.render(self.format);

        match record {
            MonitorRecord::Event(ServiceEvent::RequestFailure { .. }) => {
                tracing::error!(target: "service_monitor", "{}", line)
            }
            MonitorRecord::Event(ServiceEvent::RequestRejected { .. }) => {
                tracing::warn!(target: "service_monitor", "{}", line)
            }
            MonitorRecord::Event(_) => tracing::info!(target: "service_monitor", "{}", line),
            MonitorRecord::Alert(Alert {
                severity: Severity::Critical,
                ..
            }) => tracing::error!(target: "service_monitor", severity = "CRITICAL", "{}", line),
            MonitorRecord::Alert(_) => {
                tracing::warn!(target: "service_monitor", severity = "WARNING", "{}", line)
            }
        }
    }
}

/// Sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<MonitorRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    pub fn records(&self) -> Vec<MonitorRecord> {
        self.records.lock().clone()
    }

    /// Number of records whose `event`/`alert` key equals `key`
    pub fn count(&self, key: &str) -> usize {
        self.records.lock().iter().filter(|r| r.key() == key).count()
    }

    /// All alerts recorded so far
    pub fn alerts(&self) -> Vec<Alert> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                MonitorRecord::Alert(alert) => Some(alert.clone()),
                MonitorRecord::Event(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, record: &MonitorRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn recovery() -> MonitorRecord {
        ServiceEvent::ServiceRecovery {
            timestamp: Utc::now(),
            service: "warehouse".into(),
            downtime_duration_seconds: 1.5,
            status: "Service is responding normally".into(),
        }
        .into()
    }

    #[test]
    fn test_event_field_is_tag() {
        let json: Value = serde_json::from_str(&recovery().render(EventFormat::Compact)).unwrap();
        assert_eq!(json["event"], "SERVICE_RECOVERY");
        assert_eq!(json["downtime_duration_seconds"], 1.5);
    }

    #[test]
    fn test_compact_vs_expanded_same_content() {
        let record = recovery();
        let compact = record.render(EventFormat::Compact);
        let expanded = record.render(EventFormat::Expanded);

        assert!(!compact.contains('\n'));
        assert!(expanded.contains('\n'));
        let a: Value = serde_json::from_str(&compact).unwrap();
        let b: Value = serde_json::from_str(&expanded).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_alert_shape() {
        let record: MonitorRecord = Alert {
            alert: "WAREHOUSE_CONSECUTIVE_FAILURES".into(),
            severity: Severity::Critical,
            timestamp: Utc::now(),
            details: AlertDetails::ConsecutiveFailures {
                count: 3,
                threshold: 3,
                last_error: FailureKind::DatabaseError,
            },
        }
        .into();

        let json: Value = serde_json::from_str(&record.render(EventFormat::Compact)).unwrap();
        assert_eq!(json["alert"], "WAREHOUSE_CONSECUTIVE_FAILURES");
        assert_eq!(json["severity"], "CRITICAL");
        assert_eq!(json["details"]["last_error"], "DATABASE_ERROR");
        assert!(json.get("event").is_none());
        assert_eq!(record.key(), "WAREHOUSE_CONSECUTIVE_FAILURES");
    }

    #[test]
    fn test_failure_detail_type_field() {
        let detail = FailureDetail {
            kind: FailureKind::Timeout,
            message: "timed out".into(),
            retry_attempt: 1,
            max_retries: 3,
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["type"], "CONNECTION_TIMEOUT");
    }

    #[test]
    fn test_event_format_parsing() {
        assert_eq!("compact".parse::<EventFormat>().unwrap(), EventFormat::Compact);
        assert_eq!(" Expanded ".parse::<EventFormat>().unwrap(), EventFormat::Expanded);
        assert!("xml".parse::<EventFormat>().is_err());
    }

    #[test]
    fn test_recording_sink_counts_by_key() {
        let sink = RecordingSink::new();
        sink.emit(&recovery());
        sink.emit(&recovery());
        assert_eq!(sink.count("SERVICE_RECOVERY"), 2);
        assert!(sink.alerts().is_empty());
        sink.clear();
        assert!(sink.records().is_empty());
    }
}
