//! Timestamp utilities

use chrono::NaiveDate;

/// Convert a millisecond tolerance to seconds
pub fn ms_to_secs(ms: f64) -> f64 {
    ms / 1000.0
}

/// Whole calendar days from `earlier` to `later` (negative if reversed)
pub fn days_between(earlier: NaiveDate, later: NaiveDate) -> i64 {
    (later - earlier).num_days()
}

/// Format a playback position as `M:SS.s` for log lines
pub fn format_position(seconds: f64) -> String {
    let clamped = seconds.max(0.0);
    let minutes = (clamped / 60.0).floor() as u64;
    let rest = clamped - (minutes as f64 * 60.0);
    format!("{}:{:04.1}", minutes, rest)
}
