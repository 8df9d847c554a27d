//! One closed position loop per motor, plus the group that shares a driver.
//!
//! `MotorLoop` is owned by the control thread. Other threads talk to it only
//! through a `MotorHandle`: plain values are atomics, retuning goes through a
//! bounded channel that the tick drains without blocking.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU64, Ordering};

use crossbeam_channel as xch;
use eyre::WrapErr;
use motorloop_traits::{ACTUATOR_SPEED_MAX, ActuatorDriver};

use crate::atomic::AtomicF64;
use crate::decoder::{CountSource, QuadratureDecoder};
use crate::error::{ControlError, Result};
use crate::hw_error::map_hw_error;
use crate::pid::{PidController, PidGains};
use crate::status::MotorReport;

/// Pending retune messages per motor before `MotorHandle` reports `Busy`.
pub const RETUNE_QUEUE: usize = 32;

/// Parameter change applied at the start of the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Retune {
    Gains(PidGains),
    OutputLimits(f64, f64),
    IntegratorLimits(f64, f64),
    AntiWindupGain(f64),
    CountsPerRev(f64),
    GearRatio(f64),
    SpeedGain(f64),
    /// Zero the encoder count and the position estimate.
    ZeroPosition,
    /// Encoder debounce window in microseconds; 0 disables it.
    DebounceUs(u64),
}

#[derive(Debug, Default)]
pub(crate) struct MotorShared {
    pub(crate) reference: AtomicF64,
    pub(crate) enabled: AtomicBool,
    position: AtomicF64,
    command: AtomicI16,
    illegal: AtomicU64,
    encoder_faulted: AtomicBool,
    driver_faults: AtomicU64,
}

/// Thread-safe view of a running `MotorLoop`.
#[derive(Debug, Clone)]
pub struct MotorHandle {
    name: Arc<str>,
    shared: Arc<MotorShared>,
    retune: xch::Sender<Retune>,
}

impl MotorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position reference in output revolutions, picked up on the next tick.
    pub fn set_reference(&self, rev: f64) {
        self.shared.reference.store(rev, Ordering::Release);
    }

    pub fn set_enabled(&self, on: bool) {
        self.shared.enabled.store(on, Ordering::Release);
    }

    pub fn reference(&self) -> f64 {
        self.shared.reference.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn position(&self) -> f64 {
        self.shared.position.load(Ordering::Acquire)
    }

    pub fn command(&self) -> i16 {
        self.shared.command.load(Ordering::Relaxed)
    }

    pub fn illegal_count(&self) -> u64 {
        self.shared.illegal.load(Ordering::Relaxed)
    }

    pub fn driver_faults(&self) -> u64 {
        self.shared.driver_faults.load(Ordering::Relaxed)
    }

    pub fn encoder_faulted(&self) -> bool {
        self.shared.encoder_faulted.load(Ordering::Relaxed)
    }

    /// Queue a parameter change. Values are checked here so the tick never
    /// has to reject anything.
    pub fn retune(&self, msg: Retune) -> Result<()> {
        let ok = match msg {
            Retune::Gains(g) => g.kp.is_finite() && g.ki.is_finite() && g.kd.is_finite(),
            Retune::OutputLimits(a, b) | Retune::IntegratorLimits(a, b) => {
                a.is_finite() && b.is_finite()
            }
            Retune::AntiWindupGain(g) => g.is_finite() && g >= 0.0,
            Retune::CountsPerRev(v) | Retune::SpeedGain(v) => v.is_finite() && v > 0.0,
            Retune::GearRatio(v) => v.is_finite() && v != 0.0,
            Retune::ZeroPosition | Retune::DebounceUs(_) => true,
        };
        if !ok {
            return Err(eyre::Report::new(ControlError::Config(format!(
                "motor {}: rejected {msg:?}",
                self.name
            ))));
        }
        self.retune
            .try_send(msg)
            .map_err(|_| eyre::Report::new(ControlError::Busy(self.name.to_string())))
    }

    pub fn report(&self) -> MotorReport {
        MotorReport {
            name: self.name.to_string(),
            position: self.position(),
            reference: self.reference(),
            command: self.command(),
            enabled: self.is_enabled(),
            illegal_transitions: self.illegal_count(),
            driver_faults: self.driver_faults(),
            encoder_faulted: self.encoder_faulted(),
        }
    }
}

/// Map controller output to the actuator's native range. Fractions truncate
/// toward zero; NaN maps to 0.
#[inline]
pub fn to_actuator(u: f64, speed_gain: f64) -> i16 {
    let max = f64::from(ACTUATOR_SPEED_MAX);
    (u * speed_gain).clamp(-max, max) as i16
}

pub(crate) enum Encoder {
    Decoder(QuadratureDecoder),
    Counts(Box<dyn CountSource + Send>),
}

impl Encoder {
    fn source(&self) -> &dyn CountSource {
        match self {
            Self::Decoder(d) => d,
            Self::Counts(c) => c.as_ref(),
        }
    }
}

pub struct MotorLoop {
    pub(crate) name: Arc<str>,
    pub(crate) channel: u8,
    pub(crate) encoder: Encoder,
    pub(crate) pid: PidController,
    pub(crate) counts_per_rev: f64,
    pub(crate) gear_ratio: f64,
    pub(crate) speed_gain: f64,
    pub(crate) last_count: i64,
    pub(crate) position: f64,
    pub(crate) was_enabled: bool,
    pub(crate) shared: Arc<MotorShared>,
    pub(crate) retune_tx: xch::Sender<Retune>,
    pub(crate) retune_rx: xch::Receiver<Retune>,
}

impl std::fmt::Debug for MotorLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorLoop")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("position", &self.position)
            .field("enabled", &self.was_enabled)
            .finish_non_exhaustive()
    }
}

impl MotorLoop {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn handle(&self) -> MotorHandle {
        MotorHandle {
            name: self.name.clone(),
            shared: self.shared.clone(),
            retune: self.retune_tx.clone(),
        }
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn counts_per_rev(&self) -> f64 {
        self.counts_per_rev
    }

    pub fn gear_ratio(&self) -> f64 {
        self.gear_ratio
    }

    pub fn speed_gain(&self) -> f64 {
        self.speed_gain
    }

    /// One control iteration: integrate the count delta into position, run
    /// the PID, and command the driver. A disabled motor is commanded to zero
    /// (coast) on every tick; the computed command is still recorded.
    pub fn tick<D: ActuatorDriver + ?Sized>(&mut self, driver: &mut D, dt: f64) -> Result<i16> {
        self.apply_retunes();

        let enc = self.encoder.source();
        let count = enc.count();
        self.shared
            .illegal
            .store(enc.illegal_count(), Ordering::Relaxed);
        self.shared
            .encoder_faulted
            .store(enc.is_faulted(), Ordering::Relaxed);

        let delta = count.wrapping_sub(self.last_count);
        self.last_count = count;
        self.position += delta as f64 / self.counts_per_rev / self.gear_ratio;
        self.shared.position.store(self.position, Ordering::Release);

        let reference = self.shared.reference.load(Ordering::Acquire);
        let enabled = self.shared.enabled.load(Ordering::Acquire);
        if enabled && !self.was_enabled {
            self.pid.reset(0.0, reference - self.position);
            tracing::debug!(motor = %self.name, position = self.position, "enabled");
        } else if !enabled && self.was_enabled {
            tracing::debug!(motor = %self.name, position = self.position, "disabled; coasting");
        }
        self.was_enabled = enabled;

        let u = self.pid.step(reference, self.position, dt);
        let command = to_actuator(u, self.speed_gain);
        self.shared.command.store(command, Ordering::Relaxed);

        // Disabled motors hold their own channel at zero; other channels on
        // the same driver keep running.
        let sent = driver.set_speed(self.channel, if enabled { command } else { 0 });
        if let Err(e) = sent {
            self.shared.driver_faults.fetch_add(1, Ordering::Relaxed);
            return Err(eyre::Report::new(map_hw_error(&*e)))
                .wrap_err_with(|| format!("motor {}: driver command", self.name));
        }
        Ok(command)
    }

    /// Re-home: the current shaft angle becomes position 0.
    pub fn zero_position(&mut self) {
        let enc = self.encoder.source();
        enc.reset();
        self.last_count = enc.count();
        self.position = 0.0;
        self.shared.position.store(0.0, Ordering::Release);
        let reference = self.shared.reference.load(Ordering::Acquire);
        self.pid.reset(0.0, reference);
    }

    fn apply_retunes(&mut self) {
        while let Ok(msg) = self.retune_rx.try_recv() {
            tracing::debug!(motor = %self.name, ?msg, "retune");
            match msg {
                Retune::Gains(g) => self.pid.set_gains(g),
                Retune::OutputLimits(a, b) => self.pid.set_output_limits(a, b),
                Retune::IntegratorLimits(a, b) => self.pid.set_integrator_limits(a, b),
                Retune::AntiWindupGain(g) => self.pid.set_anti_windup_gain(g),
                Retune::CountsPerRev(v) => self.counts_per_rev = v,
                Retune::GearRatio(v) => self.gear_ratio = v,
                Retune::SpeedGain(v) => self.speed_gain = v,
                Retune::ZeroPosition => self.zero_position(),
                Retune::DebounceUs(us) => self.encoder.source().set_debounce_us(us),
            }
        }
    }
}

/// Motors sharing one actuator driver, ticked in insertion order.
pub struct MotorGroup<D> {
    driver: D,
    motors: Vec<MotorLoop>,
}

impl<D: ActuatorDriver> MotorGroup<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            motors: Vec::new(),
        }
    }

    pub fn push(&mut self, motor: MotorLoop) -> MotorHandle {
        let h = motor.handle();
        self.motors.push(motor);
        h
    }

    pub fn handles(&self) -> Vec<MotorHandle> {
        self.motors.iter().map(MotorLoop::handle).collect()
    }

    pub fn motors(&self) -> &[MotorLoop] {
        &self.motors
    }

    pub fn len(&self) -> usize {
        self.motors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Tick every motor. A driver failure on one motor is counted and logged
    /// and does not stop the others.
    pub fn tick(&mut self, dt: f64) {
        for m in &mut self.motors {
            if let Err(e) = m.tick(&mut self.driver, dt) {
                let faults = m.shared.driver_faults.load(Ordering::Relaxed);
                // First failure, then every 1000th, to keep a 1 kHz loop from flooding logs.
                if faults == 1 || faults % 1000 == 0 {
                    tracing::warn!(motor = %m.name, faults, error = %e, "driver command failed");
                }
            }
        }
    }

    /// Coast every channel.
    pub fn shutdown(&mut self) -> Result<()> {
        self.driver
            .coast_all()
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("coast all channels")
    }
}
