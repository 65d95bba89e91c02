//! Time helpers.
//!
//! Everything stored is unix seconds (UTC). Legacy databases stored text
//! timestamps in several shapes; [`parse_legacy_timestamp`] accepts all of
//! them.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Values above this are treated as millisecond epochs (year 5138 in seconds).
const MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

/// Current unix time in seconds.
#[must_use]
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Convert a legacy stored timestamp into unix seconds.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` (assumed UTC), the same with
/// a `T` separator and no offset, and numeric strings in seconds or
/// milliseconds. Fractional seconds are truncated.
#[must_use]
pub fn parse_legacy_timestamp(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(number) = trimmed.parse::<f64>() {
        return numeric_to_seconds(number);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp());
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(trimmed, fmt)
            .ok()
            .map(|naive| naive.and_utc().timestamp())
    })
}

/// Normalize a numeric timestamp that may be in seconds or milliseconds.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn numeric_to_seconds(value: f64) -> Option<i64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let seconds = if value >= MILLIS_THRESHOLD {
        value / 1000.0
    } else {
        value
    };
    Some(seconds.trunc() as i64)
}

/// Format a unix timestamp as RFC 3339 for human output.
#[must_use]
pub fn format_unix(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map_or_else(|| ts.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Format a relative time (past or future) against `now`.
#[must_use]
pub fn format_relative(ts: i64, now: i64) -> String {
    let delta = now - ts;
    if delta.abs() < 60 {
        return "just now".to_string();
    }

    let suffix = if delta > 0 { "ago" } else { "from now" };
    let secs = delta.abs();
    let (days, hours, minutes) = (secs / 86_400, secs / 3_600, secs / 60);

    if days > 0 {
        format!("{days} day{} {suffix}", if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("{hours} hour{} {suffix}", if hours == 1 { "" } else { "s" })
    } else {
        format!(
            "{minutes} minute{} {suffix}",
            if minutes == 1 { "" } else { "s" }
        )
    }
}
