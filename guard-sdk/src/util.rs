//! Utility module for common functionality
//!
//! Small string and time helpers shared by the monitor, the transport and the
//! configuration loader.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns redacted from anything that ends up in a log line
static SENSITIVE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Bearer [A-Za-z0-9\-_\.]+", "Bearer [REDACTED]"),
        (r"(?i)api[_-]?key[=:]\s*[A-Za-z0-9\-_]+", "api_key=[REDACTED]"),
        (r"(?i)password[=:]\s*[^\s&]+", "password=[REDACTED]"),
        (r"(?i)secret[=:]\s*[^\s&]+", "secret=[REDACTED]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Truncate a string to at most `max_chars` characters.
///
/// Counts characters rather than bytes so multi-byte input never splits.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Single-line preview of a payload, used in validation error messages
pub fn preview(s: &str, max_chars: usize) -> String {
    truncate_chars(s, max_chars).replace(&['\n', '\r'][..], " ")
}

/// Sanitize a string for logging (remove sensitive data patterns)
pub fn sanitize_for_logging(s: &str) -> String {
    let mut result = s.to_string();
    for (re, replacement) in SENSITIVE_PATTERNS.iter() {
        result = re.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Parse a duration from a string (e.g., "30s", "5m", "1h", "250ms")
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<f64>().ok().and_then(|v| Duration::try_from_secs_f64(v).ok())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<f64>().ok().and_then(|v| Duration::try_from_secs_f64(v).ok())
    }
}

/// Milliseconds since the unix epoch
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whole milliseconds of a duration, saturating
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_preview_flattens_newlines() {
        assert_eq!(preview("<html>\n<body>\r\n", 100), "<html> <body>  ");
        assert_eq!(preview("abcdef", 3), "abc");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_duration("60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("-1"), None);
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        assert_eq!(parse_duration("1e30s"), None);
        assert_eq!(parse_duration("1e30"), None);
        assert_eq!(parse_duration("inf"), None);
        assert_eq!(parse_duration("18446744073709551615m"), None);
        assert_eq!(parse_duration("5124095576030432h"), None);
    }

    #[test]
    fn test_sanitize_for_logging() {
        let output = sanitize_for_logging("Authorization: Bearer abc123xyz");
        assert!(output.contains("[REDACTED]"));
        assert!(!output.contains("abc123xyz"));

        let output = sanitize_for_logging("url?api_key=topsecret&x=1");
        assert!(!output.contains("topsecret"));
    }
}
