//! `From` implementations bridging `motorloop_config` types to `motorloop_core` types.

use std::time::Duration;

use crate::config::{DecoderCfg, LoopCfg, MotorCfg, PidCfg};

// ── PidCfg ───────────────────────────────────────────────────────────────────

impl From<&motorloop_config::PidCfg> for PidCfg {
    fn from(c: &motorloop_config::PidCfg) -> Self {
        Self {
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
            output_min: c.output_min,
            output_max: c.output_max,
            integrator_min: c.integrator_min,
            integrator_max: c.integrator_max,
            anti_windup_gain: c.anti_windup_gain,
        }
    }
}

// ── MotorCfg ─────────────────────────────────────────────────────────────────

impl From<&motorloop_config::MotorCfg> for MotorCfg {
    fn from(c: &motorloop_config::MotorCfg) -> Self {
        Self {
            name: c.name.clone(),
            channel: c.channel,
            counts_per_rev: c.counts_per_rev,
            gear_ratio: c.gear_ratio,
            speed_gain: c.speed_gain,
            reference_rev: c.reference_rev,
            enabled: c.enabled,
            pid: PidCfg::from(&c.pid),
        }
    }
}

// ── DecoderCfg ───────────────────────────────────────────────────────────────

/// Decoder settings combine the motor's debounce with the global GPIO wait.
pub fn decoder_cfg(motor: &motorloop_config::MotorCfg, gpio: &motorloop_config::GpioCfg) -> DecoderCfg {
    DecoderCfg {
        debounce_us: motor.debounce_us,
        wait_timeout: Duration::from_millis(gpio.wait_timeout_ms.max(1)),
    }
}

// ── LoopCfg ──────────────────────────────────────────────────────────────────

impl From<&motorloop_config::Config> for LoopCfg {
    fn from(c: &motorloop_config::Config) -> Self {
        Self {
            period: crate::util::period_from_us(c.control.period_us),
            housekeeping: Duration::from_millis(c.housekeeping.interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_maps_onto_runtime_types() {
        let cfg = motorloop_config::load_toml(
            r#"
[control]
period_us = 500
[gpio]
wait_timeout_ms = 20
[[motors]]
name = "arm"
channel = 2
encoder_a = 1
encoder_b = 2
debounce_us = 0
gear_ratio = 30.0
[motors.pid]
kp = 3.0
anti_windup_gain = 0.5
"#,
        )
        .expect("parse");
        let lc = LoopCfg::from(&cfg);
        assert_eq!(lc.period, Duration::from_micros(500));

        let m = MotorCfg::from(&cfg.motors[0]);
        assert_eq!(m.channel, 2);
        assert!((m.gear_ratio - 30.0).abs() < f64::EPSILON);
        assert!((m.pid.anti_windup_gain - 0.5).abs() < f64::EPSILON);

        let d = decoder_cfg(&cfg.motors[0], &cfg.gpio);
        assert_eq!(d.debounce_us, 0);
        assert_eq!(d.wait_timeout, Duration::from_millis(20));
    }
}
