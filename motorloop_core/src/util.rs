//! Common time/period helpers for motorloop_core.
use std::time::Duration;

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Control period for a given `period_us`, never shorter than 1 µs.
#[inline]
pub fn period_from_us(period_us: u64) -> Duration {
    Duration::from_micros(period_us.max(1))
}

/// Loop rate in Hz for a period; `0.0` for a zero period.
#[inline]
pub fn rate_hz(period: Duration) -> f64 {
    let secs = period.as_secs_f64();
    if secs > 0.0 { 1.0 / secs } else { 0.0 }
}

/// Duration in whole nanoseconds, saturating at `u64::MAX`.
#[inline]
pub fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
