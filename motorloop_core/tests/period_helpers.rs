// Focused tests for period helpers.
use std::time::Duration;

use motorloop_core::util::{period_from_us, rate_hz, saturating_nanos};

#[test]
fn period_from_us_floors_at_one_microsecond() {
    assert_eq!(period_from_us(1000), Duration::from_millis(1));
    assert_eq!(period_from_us(0), Duration::from_micros(1));
}

#[test]
fn rate_is_inverse_of_period() {
    assert!((rate_hz(Duration::from_millis(1)) - 1000.0).abs() < 1e-9);
    assert!((rate_hz(Duration::from_micros(250)) - 4000.0).abs() < 1e-9);
    assert_eq!(rate_hz(Duration::ZERO), 0.0);
}

#[test]
fn nanos_saturate() {
    assert_eq!(saturating_nanos(Duration::from_micros(3)), 3_000);
    assert_eq!(saturating_nanos(Duration::MAX), u64::MAX);
}
