//! Error mapping for HTTP responses
//!
//! Converts a non-success status and its body into a normalized
//! `ServiceError`, and interprets the `Retry-After` header.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use super::ServiceError;
use crate::util::truncate_chars;

/// Statuses retried by default
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Map a generic HTTP error to a ServiceError
pub fn map_http_error(status: StatusCode, body: &str) -> ServiceError {
    let detail = extract_message(body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("no body").to_string()
        } else {
            truncate_chars(body.trim(), 100)
        }
    });

    match status {
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            ServiceError::authorization(format!("{} {}", status.as_u16(), detail))
        }
        _ => ServiceError::http(status.as_u16(), detail),
    }
}

/// Pull a human-readable message out of a JSON error body
fn extract_message(body: &str) -> Option<String> {
    let json = serde_json::from_str::<Value>(body).ok()?;

    let message = json
        .get("message")
        .or_else(|| json.get("error").and_then(|e| e.get("message")))
        .or_else(|| json.get("error"))
        .or_else(|| json.get("detail"))?;

    message.as_str().map(str::to_string)
}

/// Determine if an HTTP status code is in the given retryable set
pub fn is_retryable_status(status: u16, retryable: &[u16]) -> bool {
    retryable.contains(&status)
}

/// Parse a `Retry-After` header value.
///
/// Accepts delta-seconds (integer or fractional) and HTTP dates; dates in the
/// past yield a zero wait. Values too large for a `Duration` are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
