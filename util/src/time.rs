//! General time utility functions

use chrono;
use std::time::Duration;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration.num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Convert a (possibly negative or non-finite) number of seconds into a std duration.
///
/// Negative and NaN values give a zero duration.
pub fn seconds_to_std(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    }
    else {
        Duration::from_secs(0)
    }
}

/// Period of one cycle of a loop running at the given frequency.
///
/// Non-positive frequencies give a zero period.
pub fn period_from_hz(freq_hz: f64) -> Duration {
    if freq_hz > 0.0 {
        seconds_to_std(1.0 / freq_hz)
    }
    else {
        Duration::from_secs(0)
    }
}
