#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the motor control stack.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Swapped min/max pairs are accepted here; the controller self-corrects them.
use std::collections::HashSet;

use serde::Deserialize;

/// Highest Motoron channel index.
pub const MAX_DRIVER_CHANNEL: u8 = 3;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlCfg {
    /// Control loop period in microseconds (1000 = 1 kHz).
    pub period_us: u64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self { period_us: 1000 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RtCfg {
    /// Request SCHED_FIFO for the control thread.
    pub enabled: bool,
    /// SCHED_FIFO priority (clamped to the system range at runtime).
    pub priority: i32,
}

impl Default for RtCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 80,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DriverCfg {
    /// I2C bus number (`/dev/i2c-<bus>`).
    pub i2c_bus: u8,
    /// 7-bit controller address.
    pub address: u16,
}

impl Default for DriverCfg {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            address: 0x10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GpioCfg {
    /// Bounded wait for encoder edges; also the worst-case shutdown latency.
    pub wait_timeout_ms: u64,
}

impl Default for GpioCfg {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HousekeepingCfg {
    /// Statistics window / report cadence.
    pub interval_ms: u64,
}

impl Default for HousekeepingCfg {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub output_min: f64,
    pub output_max: f64,
    pub integrator_min: f64,
    pub integrator_max: f64,
    /// 0 selects conditional integration instead of back-calculation.
    pub anti_windup_gain: f64,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            output_min: -1.0,
            output_max: 1.0,
            integrator_min: -1e6,
            integrator_max: 1e6,
            anti_windup_gain: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MotorCfg {
    pub name: String,
    /// Driver channel (1..=3).
    pub channel: u8,
    /// GPIO line offsets of the encoder channels.
    pub encoder_a: u8,
    pub encoder_b: u8,
    #[serde(default = "default_debounce_us")]
    pub debounce_us: u64,
    /// Quadrature (4x) counts per motor revolution.
    #[serde(default = "default_counts_per_rev")]
    pub counts_per_rev: f64,
    #[serde(default = "default_gear_ratio")]
    pub gear_ratio: f64,
    /// Actuator units per unit of controller output.
    #[serde(default = "default_speed_gain")]
    pub speed_gain: f64,
    #[serde(default)]
    pub reference_rev: f64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub pid: PidCfg,
}

fn default_debounce_us() -> u64 {
    5
}
fn default_counts_per_rev() -> f64 {
    4096.0
}
fn default_gear_ratio() -> f64 {
    1.0
}
fn default_speed_gain() -> f64 {
    800.0
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub control: ControlCfg,
    #[serde(default)]
    pub rt: RtCfg,
    #[serde(default)]
    pub driver: DriverCfg,
    #[serde(default)]
    pub gpio: GpioCfg,
    #[serde(default)]
    pub housekeeping: HousekeepingCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub motors: Vec<MotorCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn motor(&self, name: &str) -> Option<&MotorCfg> {
        self.motors.iter().find(|m| m.name == name)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Control
        if !(50..=1_000_000).contains(&self.control.period_us) {
            eyre::bail!("control.period_us must be in [50, 1000000]");
        }

        // RT
        if !(1..=99).contains(&self.rt.priority) {
            eyre::bail!("rt.priority must be in [1, 99]");
        }

        // Driver
        if self.driver.address > 0x7F {
            eyre::bail!("driver.address must be a 7-bit I2C address");
        }

        // GPIO
        if self.gpio.wait_timeout_ms == 0 {
            eyre::bail!("gpio.wait_timeout_ms must be >= 1");
        }

        // Housekeeping
        if self.housekeeping.interval_ms < 100 {
            eyre::bail!("housekeeping.interval_ms must be >= 100");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        // Motors
        if self.motors.is_empty() {
            eyre::bail!("at least one [[motors]] entry is required");
        }
        let mut names = HashSet::new();
        let mut channels = HashSet::new();
        for (i, m) in self.motors.iter().enumerate() {
            if m.name.trim().is_empty() {
                eyre::bail!("motors[{i}].name must not be empty");
            }
            if !names.insert(m.name.as_str()) {
                eyre::bail!("motors[{i}].name '{}' is duplicated", m.name);
            }
            if !(1..=MAX_DRIVER_CHANNEL).contains(&m.channel) {
                eyre::bail!("motors[{i}].channel must be in [1, {MAX_DRIVER_CHANNEL}]");
            }
            if !channels.insert(m.channel) {
                eyre::bail!("motors[{i}].channel {} is already used", m.channel);
            }
            if m.encoder_a == m.encoder_b {
                eyre::bail!("motors[{i}].encoder_a and encoder_b must be different lines");
            }
            if !(m.counts_per_rev.is_finite() && m.counts_per_rev > 0.0) {
                eyre::bail!("motors[{i}].counts_per_rev must be > 0");
            }
            if !m.gear_ratio.is_finite() || m.gear_ratio == 0.0 {
                eyre::bail!("motors[{i}].gear_ratio must be finite and non-zero");
            }
            if !(m.speed_gain.is_finite() && m.speed_gain > 0.0) {
                eyre::bail!("motors[{i}].speed_gain must be > 0");
            }
            if !m.reference_rev.is_finite() {
                eyre::bail!("motors[{i}].reference_rev must be finite");
            }
            let p = &m.pid;
            let all_finite = [
                p.kp,
                p.ki,
                p.kd,
                p.output_min,
                p.output_max,
                p.integrator_min,
                p.integrator_max,
                p.anti_windup_gain,
            ]
            .iter()
            .all(|v| v.is_finite());
            if !all_finite {
                eyre::bail!("motors[{i}].pid values must be finite");
            }
            if p.anti_windup_gain < 0.0 {
                eyre::bail!("motors[{i}].pid.anti_windup_gain must be >= 0");
            }
        }
        Ok(())
    }
}
