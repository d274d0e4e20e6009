//! Wall-clock helpers
//!
//! All timestamps handled by the engine are household-local wall-clock times.
//! These helpers keep minute arithmetic and day boundaries in one place.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};

use crate::error::ComputeError;
use crate::types::Timestamp;

/// Signed number of minutes from `from` to `to`
pub fn minutes_between(from: Timestamp, to: Timestamp) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}

/// Shift a timestamp by a (possibly fractional) number of minutes
pub fn add_minutes(ts: Timestamp, minutes: f64) -> Timestamp {
    if !minutes.is_finite() {
        return ts;
    }
    ts + Duration::seconds((minutes * 60.0).round() as i64)
}

/// Minutes elapsed since local midnight
pub fn clock_minutes(ts: Timestamp) -> f64 {
    (ts.hour() * 60 + ts.minute()) as f64 + ts.second() as f64 / 60.0
}

/// Start of the household day containing `ts`
///
/// A household day runs from `boundary_hour` to `boundary_hour` the next
/// morning, so a 03:00 night feed still belongs to the previous day.
pub fn day_start(ts: Timestamp, boundary_hour: u32) -> Timestamp {
    let midnight = ts.date().and_time(NaiveTime::MIN);
    let boundary = midnight + Duration::hours(boundary_hour.min(23) as i64);
    if ts < boundary {
        boundary - Duration::days(1)
    } else {
        boundary
    }
}

/// Timestamp at `minutes` past midnight on the date of `reference`
pub fn at_clock(reference: Timestamp, minutes: f64) -> Timestamp {
    add_minutes(reference.date().and_time(NaiveTime::MIN), minutes)
}

/// Stable day index used to rotate daily content
pub fn day_of_year(ts: Timestamp) -> u32 {
    ts.ordinal()
}

/// Format minutes since midnight as `19h05`
pub fn format_clock(minutes: f64) -> String {
    let total = minutes.round().rem_euclid(24.0 * 60.0) as u32;
    format!("{}h{:02}", total / 60, total % 60)
}

/// Parse an ISO-8601 local timestamp (`2024-03-10T14:00:00`, seconds optional)
pub fn parse_timestamp(raw: &str) -> Result<Timestamp, ComputeError> {
    let trimmed = raw.trim();
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| ComputeError::InvalidTimestamp(format!("{trimmed}: {e}")))
}
