//! Wall-clock helpers.
//!
//! Postings store dates as day counts since the Unix epoch; caches and
//! row sets keep millisecond timestamps.

use chrono::Utc;

/// Milliseconds in one day.
pub const DAY_MILLIS: u64 = 86_400_000;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Day count for a millisecond timestamp.
pub fn days_from_millis(millis: u64) -> u64 {
    millis / DAY_MILLIS
}

/// First millisecond of the given day.
pub fn millis_from_days(days: u64) -> u64 {
    days.saturating_mul(DAY_MILLIS)
}

/// Timestamp used in segment file names, `yyyyMMddHHmmssSSS` in UTC.
pub fn file_stamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
}
