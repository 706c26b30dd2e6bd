//! UTC time helpers. Every timestamp in the stores is Unix seconds, UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{FleetError, Result};

pub const SECONDS_PER_HOUR: i64 = 3600;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Parses a `YYYY-MM-DD` date and an `HH-MM-SS` time as UTC.
pub fn parse_date_time(date: &str, time: &str) -> Result<i64> {
    let parsed = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H-%M-%S")?;
    Ok(parsed.and_utc().timestamp())
}

pub fn truncate_to_day(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(SECONDS_PER_DAY)
}

pub fn truncate_to_hour(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(SECONDS_PER_HOUR)
}

/// The UTC calendar day containing `timestamp`.
pub fn day_of(timestamp: i64) -> Result<NaiveDate> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| FleetError::Parse(format!("timestamp {timestamp} out of range")))
}

/// Midnight UTC at the start of `day`.
pub fn day_start(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

pub fn to_millis(timestamp: i64) -> i64 {
    timestamp.saturating_mul(1000)
}
