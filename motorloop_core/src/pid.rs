//! Discrete PID with output saturation and anti-windup.
//!
//! Two anti-windup modes share one controller:
//! - back-calculation when `anti_windup_gain > 0`: the integrator is bled by
//!   `gain * (clamped - unclamped)` each step;
//! - conditional integration otherwise: the integrator is frozen while the
//!   output is saturated and the error pushes further into saturation.
//!
//! The integrator is clamped to its own limits after every update in both modes.
use crate::config::PidCfg;

/// Floor applied to non-positive (or NaN) time steps.
pub const MIN_DT: f64 = 1e-6;

/// Closed interval; the constructor swaps reversed bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    min: f64,
    max: f64,
}

impl Limits {
    pub fn new(a: f64, b: f64) -> Self {
        if a > b {
            Self { min: b, max: a }
        } else {
            Self { min: a, max: b }
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    #[inline]
    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AntiWindup {
    BackCalculation { gain: f64 },
    ConditionalIntegration,
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    output: Limits,
    integrator_limits: Limits,
    anti_windup_gain: f64,
    integrator: f64,
    prev_error: f64,
    last_unclamped: f64,
    last_clamped: f64,
}

impl Default for PidController {
    fn default() -> Self {
        Self::new(&PidCfg::default())
    }
}

impl PidController {
    pub fn new(cfg: &PidCfg) -> Self {
        Self {
            gains: PidGains {
                kp: cfg.kp,
                ki: cfg.ki,
                kd: cfg.kd,
            },
            output: Limits::new(cfg.output_min, cfg.output_max),
            integrator_limits: Limits::new(cfg.integrator_min, cfg.integrator_max),
            anti_windup_gain: cfg.anti_windup_gain,
            integrator: 0.0,
            prev_error: 0.0,
            last_unclamped: 0.0,
            last_clamped: 0.0,
        }
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn set_output_limits(&mut self, a: f64, b: f64) {
        self.output = Limits::new(a, b);
    }

    /// New integrator bounds; the current integrator is clamped into them.
    pub fn set_integrator_limits(&mut self, a: f64, b: f64) {
        self.integrator_limits = Limits::new(a, b);
        self.integrator = self.integrator_limits.clamp(self.integrator);
    }

    pub fn set_anti_windup_gain(&mut self, gain: f64) {
        self.anti_windup_gain = gain;
    }

    /// Set the integrator (clamped) and the previous error, and zero the
    /// last outputs. Use the current error as `prev_error` to avoid a
    /// derivative kick on the next step.
    pub fn reset(&mut self, integrator: f64, prev_error: f64) {
        self.integrator = self.integrator_limits.clamp(integrator);
        self.prev_error = prev_error;
        self.last_unclamped = 0.0;
        self.last_clamped = 0.0;
    }

    pub fn step(&mut self, reference: f64, measurement: f64, dt: f64) -> f64 {
        let dt = if dt > 0.0 { dt } else { MIN_DT };
        let PidGains { kp, ki, kd } = self.gains;

        let error = reference - measurement;
        let derivative = (error - self.prev_error) / dt;
        let unclamped = kp * error + self.integrator + kd * derivative;
        let clamped = self.output.clamp(unclamped);

        match self.anti_windup() {
            AntiWindup::BackCalculation { gain } => {
                self.integrator += (ki * error + gain * (clamped - unclamped)) * dt;
            }
            AntiWindup::ConditionalIntegration => {
                let deeper_high = unclamped >= self.output.max && error > 0.0;
                let deeper_low = unclamped <= self.output.min && error < 0.0;
                if !(deeper_high || deeper_low) {
                    self.integrator += ki * error * dt;
                }
            }
        }
        self.integrator = self.integrator_limits.clamp(self.integrator);

        self.prev_error = error;
        self.last_unclamped = unclamped;
        self.last_clamped = clamped;
        clamped
    }

    pub fn anti_windup(&self) -> AntiWindup {
        if self.anti_windup_gain > 0.0 {
            AntiWindup::BackCalculation {
                gain: self.anti_windup_gain,
            }
        } else {
            AntiWindup::ConditionalIntegration
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn output_limits(&self) -> Limits {
        self.output
    }

    pub fn integrator_limits(&self) -> Limits {
        self.integrator_limits
    }

    pub fn anti_windup_gain(&self) -> f64 {
        self.anti_windup_gain
    }

    pub fn integrator(&self) -> f64 {
        self.integrator
    }

    pub fn prev_error(&self) -> f64 {
        self.prev_error
    }

    pub fn last_unclamped(&self) -> f64 {
        self.last_unclamped
    }

    pub fn last_clamped(&self) -> f64 {
        self.last_clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(kp: f64, ki: f64, kd: f64, awg: f64) -> PidController {
        PidController::new(&PidCfg {
            kp,
            ki,
            kd,
            anti_windup_gain: awg,
            ..PidCfg::default()
        })
    }

    #[test]
    fn proportional_only_inside_limits() {
        let mut c = pid(0.5, 0.0, 0.0, 0.0);
        assert!((c.step(1.0, 0.2, 0.001) - 0.4).abs() < 1e-12);
        assert!((c.last_unclamped() - c.last_clamped()).abs() < 1e-12);
    }

    #[test]
    fn reversed_bounds_are_swapped() {
        let mut c = PidController::new(&PidCfg {
            kp: 10.0,
            output_min: 2.0,
            output_max: -2.0,
            integrator_min: 5.0,
            integrator_max: -5.0,
            ..PidCfg::default()
        });
        assert_eq!(c.output_limits(), Limits::new(-2.0, 2.0));
        assert_eq!(c.integrator_limits().min(), -5.0);
        assert_eq!(c.step(1.0, 0.0, 0.001), 2.0);
        assert_eq!(c.step(-1.0, 0.0, 0.001), -2.0);
    }

    #[test]
    fn back_calculation_converges_to_the_bound() {
        // e = 10, kp = ki = gain = 1, output ±1: the integrator settles where
        // ki*e + gain*(1 - (10 + I)) = 0, i.e. I = 1.
        let mut c = pid(1.0, 1.0, 0.0, 1.0);
        let mut last_step = f64::INFINITY;
        let mut prev = c.integrator();
        for _ in 0..2_000 {
            assert_eq!(c.step(10.0, 0.0, 0.01), 1.0);
            let inc = (c.integrator() - prev).abs();
            assert!(inc <= last_step + 1e-12, "increment grew: {inc} > {last_step}");
            last_step = inc;
            prev = c.integrator();
        }
        assert!((c.integrator() - 1.0).abs() < 1e-6, "I = {}", c.integrator());
    }

    #[test]
    fn conditional_integration_freezes_while_pushing_deeper() {
        let mut c = pid(10.0, 1.0, 0.0, 0.0);
        c.reset(0.3, 0.0);
        assert_eq!(c.step(1.0, 0.0, 0.01), 1.0); // saturated high, error positive
        assert_eq!(c.integrator(), 0.3);
        c.reset(-0.3, 0.0);
        assert_eq!(c.step(-1.0, 0.0, 0.01), -1.0); // saturated low, error negative
        assert_eq!(c.integrator(), -0.3);
    }

    #[test]
    fn conditional_integration_unwinds_when_error_reverses() {
        let mut c = pid(0.0, 1.0, 0.0, 0.0);
        c.reset(5.0, 0.0);
        // Output saturated high but the error now pulls down: integrate.
        let out = c.step(0.0, 1.0, 0.1);
        assert_eq!(out, 1.0);
        assert!((c.integrator() - 4.9).abs() < 1e-12);
    }

    #[test]
    fn integrator_is_clamped_in_both_modes() {
        for awg in [0.0, 0.1] {
            let mut c = PidController::new(&PidCfg {
                ki: 100.0,
                output_min: -1e9,
                output_max: 1e9,
                integrator_min: -0.5,
                integrator_max: 0.5,
                anti_windup_gain: awg,
                ..PidCfg::default()
            });
            for _ in 0..100 {
                c.step(1.0, 0.0, 0.01);
            }
            assert_eq!(c.integrator(), 0.5);
        }
    }

    #[test]
    fn non_positive_dt_uses_floor() {
        let mut c = pid(0.0, 0.0, 1e-6, 0.0);
        // derivative = 1 / MIN_DT, scaled by kd = 1e-6 → 1.0 (at the bound).
        let out = c.step(1.0, 0.0, 0.0);
        assert!(out.is_finite());
        assert!((c.last_unclamped() - 1.0).abs() < 1e-9);
        let out = c.step(1.0, 0.0, -3.0);
        assert!(out.is_finite());
        assert!(c.step(2.0, 0.0, f64::NAN).is_finite());
    }

    #[test]
    fn reset_avoids_derivative_kick() {
        let mut c = pid(0.0, 0.0, 1.0, 0.0);
        c.reset(0.0, 0.3);
        c.step(0.3, 0.0, 0.001);
        assert_eq!(c.last_unclamped(), 0.0);
    }

    #[test]
    fn reset_zeroes_last_outputs() {
        let mut c = pid(10.0, 0.0, 0.0, 0.0);
        c.step(1.0, 0.0, 0.001);
        assert_eq!((c.last_unclamped(), c.last_clamped()), (10.0, 1.0));
        c.reset(0.0, 0.0);
        assert_eq!((c.last_unclamped(), c.last_clamped()), (0.0, 0.0));
    }

    #[test]
    fn reset_clamps_integrator() {
        let mut c = pid(0.0, 0.0, 0.0, 0.0);
        c.set_integrator_limits(-2.0, 2.0);
        c.reset(9.0, 0.0);
        assert_eq!(c.integrator(), 2.0);
    }

    #[test]
    fn mode_follows_gain() {
        let mut c = pid(0.0, 0.0, 0.0, 0.0);
        assert_eq!(c.anti_windup(), AntiWindup::ConditionalIntegration);
        c.set_anti_windup_gain(0.25);
        assert_eq!(c.anti_windup(), AntiWindup::BackCalculation { gain: 0.25 });
    }
}
