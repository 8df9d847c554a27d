//! Configuration types for the control engine.
//!
//! These are the runtime configuration structs used by the decoder, the PID
//! and the motor loop. They are separate from the TOML-deserialized config in
//! `motorloop_config`.
use std::time::Duration;

/// Quadrature decoder settings.
#[derive(Debug, Clone, Copy)]
pub struct DecoderCfg {
    /// Minimum spacing between accepted edges on one channel. 0 disables debounce.
    pub debounce_us: u64,
    /// Upper bound on one wait for edges; also bounds shutdown latency.
    pub wait_timeout: Duration,
}

impl Default for DecoderCfg {
    fn default() -> Self {
        Self {
            debounce_us: 5,
            wait_timeout: Duration::from_millis(100),
        }
    }
}

/// PID gains, limits and anti-windup selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub output_min: f64,
    pub output_max: f64,
    pub integrator_min: f64,
    pub integrator_max: f64,
    /// Back-calculation gain; 0 selects conditional integration.
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

/// Per-motor settings.
#[derive(Debug, Clone)]
pub struct MotorCfg {
    pub name: String,
    /// Driver channel the motor is wired to.
    pub channel: u8,
    /// Quadrature counts per motor revolution.
    pub counts_per_rev: f64,
    /// Motor revolutions per output revolution.
    pub gear_ratio: f64,
    /// Actuator units per unit of controller output.
    pub speed_gain: f64,
    /// Initial position reference in output revolutions.
    pub reference_rev: f64,
    /// Start enabled.
    pub enabled: bool,
    pub pid: PidCfg,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            name: "motor".into(),
            channel: 1,
            counts_per_rev: 4096.0,
            gear_ratio: 1.0,
            speed_gain: f64::from(motorloop_traits::ACTUATOR_SPEED_MAX),
            reference_rev: 0.0,
            enabled: false,
            pid: PidCfg::default(),
        }
    }
}

/// Control thread timing.
#[derive(Debug, Clone, Copy)]
pub struct LoopCfg {
    pub period: Duration,
    /// Statistics window and report cadence.
    pub housekeeping: Duration,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(1),
            housekeeping: Duration::from_secs(1),
        }
    }
}
