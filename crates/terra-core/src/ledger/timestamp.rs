//! Ledger timestamps.
//!
//! Timestamps are stored as UTC text in `YYYY-MM-DD HH:MM:SS` form, which
//! sorts lexicographically in time order, so age filters are plain string
//! comparisons against a cutoff produced here.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

/// Storage format of `time_verified`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Largest age, in either direction, accepted for an age filter
/// (1000 years).
pub const MAX_AGE_SECS: i64 = 1000 * 365 * 24 * 60 * 60;

/// Formats a UTC instant for storage.
pub fn format(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// The current time, formatted for storage.
pub fn now() -> String {
    format(Utc::now())
}

/// Parses a stored timestamp.
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Cutoff for rows older than `secs` seconds relative to `reference`.
///
/// A negative age yields a cutoff in the future, so every row qualifies.
/// Returns `None` if `secs` exceeds [`MAX_AGE_SECS`] in magnitude.
pub fn cutoff_from(reference: DateTime<Utc>, secs: i64) -> Option<String> {
    match secs.checked_abs() {
        Some(abs) if abs <= MAX_AGE_SECS => {},
        _ => return None,
    }
    let age = TimeDelta::try_seconds(secs)?;
    reference.checked_sub_signed(age).map(format)
}

/// Cutoff for rows older than `secs` seconds relative to now.
pub fn cutoff(secs: i64) -> Option<String> {
    cutoff_from(Utc::now(), secs)
}
