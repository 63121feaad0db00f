//! Shared curve and time helpers used by the calculators and queues.

use chrono::{DateTime, TimeZone, Timelike};

use crate::common::constants::HOURS_PER_DAY;

/// Clamp a value into the logical intensity range.
///
/// NaN collapses to 0.0 so a broken calculation can never drive a channel to
/// an undefined level.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Linear interpolation between two values.
pub fn lerp(start: f64, end: f64, progress: f64) -> f64 {
    start + (end - start) * progress
}

/// Hermite smoothstep `3p² − 2p³` with the input clamped to [0,1].
pub fn smoothstep(progress: f64) -> f64 {
    let p = clamp_unit(progress);
    p * p * (3.0 - 2.0 * p)
}

/// Fractional hour of day (0.0..24.0) of a zoned timestamp.
pub fn fractional_hour<Tz: TimeZone>(time: &DateTime<Tz>) -> f64 {
    time.hour() as f64
        + time.minute() as f64 / 60.0
        + time.second() as f64 / 3600.0
        + time.nanosecond() as f64 / 3_600_000_000_000.0
}

/// Wrap any hour value into 0.0..24.0.
pub fn wrap_hour(hour: f64) -> f64 {
    hour.rem_euclid(HOURS_PER_DAY)
}

/// Shortest distance in hours between two clock hours on a 24-hour dial.
pub fn circular_hour_distance(a: f64, b: f64) -> f64 {
    let diff = (wrap_hour(a) - wrap_hour(b)).abs();
    diff.min(HOURS_PER_DAY - diff)
}

/// Whether `hour` falls inside `[start, end)`. When `start > end` the window
/// spans midnight.
pub fn hour_in_window(hour: f64, start: f64, end: f64) -> bool {
    let (hour, start, end) = (wrap_hour(hour), wrap_hour(start), wrap_hour(end));
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}
