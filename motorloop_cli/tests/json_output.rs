//! `--json` output: one parsable object per report on stdout; logs stay on stderr.
use assert_cmd::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

const CFG: &str = r#"
[[motors]]
name = "left"
channel = 1
encoder_a = 17
encoder_b = 27
counts_per_rev = 4096
reference_rev = 0.25
enabled = true

[motors.pid]
kp = 10.0
ki = 40.0
kd = 0.1

[[motors]]
name = "idle"
channel = 2
encoder_a = 5
encoder_b = 6
"#;

fn run_json(args: &[&str], toml: &str) -> (Option<i32>, String) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    let out = Command::cargo_bin("motorloop")
        .unwrap()
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&path)
        .arg("--json")
        .args(args)
        .output()
        .unwrap();
    (out.status.code(), String::from_utf8(out.stdout).unwrap())
}

#[test]
fn run_summary_is_a_single_json_object() {
    let (code, stdout) = run_json(&["run", "--sim", "--duration-s", "0.5"], CFG);
    assert_eq!(code, Some(0), "stdout: {stdout}");
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).expect("summary json");

    assert!(v["iterations"].as_u64().unwrap() > 100);
    assert!(v["misses"].as_u64().is_some());
    assert!(v["worst_overrun_us"].as_u64().is_some());
    let motors = v["motors"].as_array().unwrap();
    assert_eq!(motors.len(), 2);

    let left = &motors[0];
    assert_eq!(left["name"], "left");
    assert_eq!(left["enabled"], true);
    assert_eq!(left["encoder_faulted"], false);
    assert_eq!(left["illegal_transitions"], 0);
    // Half a second at 1 kHz is plenty to move toward a quarter turn.
    assert!(left["position"].as_f64().unwrap() > 0.05);

    let idle = &motors[1];
    assert_eq!(idle["enabled"], false);
    assert_eq!(idle["position"].as_f64(), Some(0.0));
}

#[test]
fn encoder_bring_up_streams_counts() {
    let (code, stdout) = run_json(
        &["encoder", "--motor", "left", "--sim", "--duration-s", "0.35"],
        CFG,
    );
    assert_eq!(code, Some(0));
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    assert!(lines.len() >= 3, "only {} lines", lines.len());
    assert!(lines.iter().all(|l| l["motor"] == "left"));
    let counts: Vec<i64> = lines.iter().map(|l| l["count"].as_i64().unwrap()).collect();
    assert!(counts.windows(2).all(|w| w[1] >= w[0]));
    assert!(*counts.last().unwrap() > 0);
    assert_eq!(lines.last().unwrap()["illegal"], 0);
}

#[test]
fn self_check_reports_ok() {
    let (code, stdout) = run_json(&["self-check"], CFG);
    assert_eq!(code, Some(0));
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(v["status"], "ok");
    assert_eq!(v["motors"], 2);
}

#[test]
fn config_error_is_reported_as_json() {
    let (code, stdout) = run_json(&["self-check"], &CFG.replacen("channel = 2", "channel = 1", 1));
    assert_eq!(code, Some(2));
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(v["reason"], "config");
    assert_eq!(v["exit_code"], 2);
    assert!(v["error"].as_str().unwrap().contains("already used"));
}
