use motorloop_config::load_toml;
use rstest::rstest;

const BASE: &str = r#"
[control]
period_us = 1000

[[motors]]
name = "left"
channel = 1
encoder_a = 17
encoder_b = 27
counts_per_rev = 4096
enabled = true

[motors.pid]
kp = 8.0
ki = 2.0
kd = 0.05
"#;

fn expect_rejected(toml: &str, needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("config should be rejected");
    let msg = format!("{err}").to_lowercase();
    assert!(msg.contains(needle), "'{msg}' does not mention '{needle}'");
}

#[test]
fn accepts_minimal_config_and_fills_defaults() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");

    assert_eq!(cfg.rt.priority, 80);
    assert_eq!(cfg.gpio.wait_timeout_ms, 100);
    assert_eq!(cfg.housekeeping.interval_ms, 1000);
    assert_eq!(cfg.driver.address, 0x10);

    let m = cfg.motor("left").expect("motor by name");
    assert_eq!(m.debounce_us, 5);
    assert!((m.gear_ratio - 1.0).abs() < f64::EPSILON);
    assert!((m.speed_gain - 800.0).abs() < f64::EPSILON);
    assert!((m.pid.output_max - 1.0).abs() < f64::EPSILON);
    assert!((m.pid.integrator_min + 1e6).abs() < f64::EPSILON);
    assert!(cfg.motor("right").is_none());
}

#[test]
fn rejects_empty_motor_list() {
    expect_rejected("[control]\nperiod_us = 1000\n", "at least one");
}

#[test]
fn rejects_duplicate_motor_names() {
    let toml = format!(
        "{BASE}
[[motors]]
name = \"left\"
channel = 2
encoder_a = 5
encoder_b = 6
"
    );
    expect_rejected(&toml, "duplicated");
}

#[test]
fn rejects_shared_driver_channel() {
    let toml = format!(
        "{BASE}
[[motors]]
name = \"right\"
channel = 1
encoder_a = 5
encoder_b = 6
"
    );
    expect_rejected(&toml, "already used");
}

#[rstest]
#[case("channel = 1", "channel = 0", "channel must be in")]
#[case("channel = 1", "channel = 4", "channel must be in")]
#[case("encoder_b = 27", "encoder_b = 17", "different lines")]
#[case("counts_per_rev = 4096", "counts_per_rev = 0", "counts_per_rev")]
#[case("counts_per_rev = 4096", "counts_per_rev = 4096\ngear_ratio = 0.0", "gear_ratio")]
#[case("counts_per_rev = 4096", "counts_per_rev = 4096\nspeed_gain = -1.0", "speed_gain")]
#[case("period_us = 1000", "period_us = 10", "period_us")]
#[case("kd = 0.05", "kd = 0.05\nanti_windup_gain = -0.5", "anti_windup_gain")]
#[case("kd = 0.05", "kd = nan", "finite")]
fn rejects_out_of_range_values(#[case] from: &str, #[case] to: &str, #[case] needle: &str) {
    expect_rejected(&BASE.replacen(from, to, 1), needle);
}

#[test]
fn rejects_short_housekeeping_and_zero_wait() {
    expect_rejected(
        &format!("[housekeeping]\ninterval_ms = 50\n{BASE}"),
        "housekeeping",
    );
    expect_rejected(
        &format!("[gpio]\nwait_timeout_ms = 0\n{BASE}"),
        "wait_timeout_ms",
    );
    expect_rejected(&format!("[rt]\npriority = 120\n{BASE}"), "rt.priority");
    expect_rejected(
        &format!("[logging]\nrotation = \"weekly\"\n{BASE}"),
        "logging.rotation",
    );
}

#[test]
fn swapped_limits_are_left_for_the_controller() {
    let toml = BASE.replacen(
        "kd = 0.05",
        "kd = 0.05\noutput_min = 1.0\noutput_max = -1.0",
        1,
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    cfg.validate().expect("swapped bounds are accepted");
}

#[test]
fn loads_from_file() {
    use std::io::Write;
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    f.write_all(BASE.as_bytes()).expect("write");
    let text = std::fs::read_to_string(f.path()).expect("read back");
    let cfg = load_toml(&text).expect("parse TOML");
    assert_eq!(cfg.motors.len(), 1);
}
