//! Failure classification
//!
//! Maps a raw error message onto a closed set of failure kinds by
//! case-insensitive substring matching. Rules are ordered and the first match
//! wins, because the categories overlap ("connection timed out" is a timeout,
//! not a connection error).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of failure categories reported to the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    #[serde(rename = "CONNECTION_TIMEOUT")]
    Timeout,
    #[serde(rename = "CONNECTION_ERROR")]
    ConnectionError,
    #[serde(rename = "HTTP_ERROR")]
    HttpError,
    #[serde(rename = "JSON_DECODE_ERROR")]
    DecodeError,
    #[serde(rename = "ACCESS_DENIED")]
    AccessDenied,
    #[serde(rename = "DNS_RESOLUTION_FAILED")]
    DnsError,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl FailureKind {
    /// Wire name used in structured events
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "CONNECTION_TIMEOUT",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::HttpError => "HTTP_ERROR",
            Self::DecodeError => "JSON_DECODE_ERROR",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::DnsError => "DNS_RESOLUTION_FAILED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const HTTP_STATUS_MARKERS: [&str; 5] = ["404", "500", "502", "503", "504"];

/// Classify an error message.
///
/// Total and deterministic: anything unmatched is `Unknown`.
pub fn classify(message: &str) -> FailureKind {
    let msg = message.to_lowercase();
    let has = |needle: &str| msg.contains(needle);

    if has("timed out") || has("timeout") {
        FailureKind::Timeout
    } else if has("connection") && (has("refused") || has("failed")) {
        FailureKind::ConnectionError
    } else if has("access denied") || has("forbidden") || has("403") {
        FailureKind::AccessDenied
    } else if has("dns resolution failed") {
        FailureKind::DnsError
    } else if has("json") {
        FailureKind::DecodeError
    } else if HTTP_STATUS_MARKERS.iter().any(|code| has(code)) {
        FailureKind::HttpError
    } else if has("sql") || has("database") || has("driver") {
        FailureKind::DatabaseError
    } else {
        FailureKind::Unknown
    }
}
