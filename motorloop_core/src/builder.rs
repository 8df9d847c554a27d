//! Type-state builder for `MotorLoop`.
//!
//! The builder enforces at compile time that an encoder and a driver channel
//! are provided before `build()` is available. `try_build()` is always
//! available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use crossbeam_channel as xch;

use crate::config::{MotorCfg, PidCfg};
use crate::decoder::{CountSource, QuadratureDecoder};
use crate::error::{BuildError, Result};
use crate::motor::{Encoder, MotorLoop, MotorShared, RETUNE_QUEUE};
use crate::pid::PidController;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `MotorLoop`. All values are validated on `build()`.
pub struct MotorLoopBuilder<E, C> {
    name: Option<String>,
    encoder: Option<Encoder>,
    channel: Option<u8>,
    cfg: MotorCfg,
    _e: PhantomData<E>,
    _c: PhantomData<C>,
}

impl Default for MotorLoopBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            name: None,
            encoder: None,
            channel: None,
            cfg: MotorCfg::default(),
            _e: PhantomData,
            _c: PhantomData,
        }
    }
}

impl MotorLoop {
    /// Start building a MotorLoop.
    pub fn builder() -> MotorLoopBuilder<Missing, Missing> {
        MotorLoopBuilder::default()
    }
}

impl<E, C> MotorLoopBuilder<E, C> {
    fn retype<E2, C2>(self) -> MotorLoopBuilder<E2, C2> {
        MotorLoopBuilder {
            name: self.name,
            encoder: self.encoder,
            channel: self.channel,
            cfg: self.cfg,
            _e: PhantomData,
            _c: PhantomData,
        }
    }

    /// Use a running decoder; the loop takes ownership and stops it on drop.
    pub fn with_decoder(mut self, decoder: QuadratureDecoder) -> MotorLoopBuilder<Set, C> {
        self.encoder = Some(Encoder::Decoder(decoder));
        self.retype()
    }

    /// Use any count source (a plant model or shared counters).
    pub fn with_counts<S: CountSource + Send + 'static>(
        mut self,
        source: S,
    ) -> MotorLoopBuilder<Set, C> {
        self.encoder = Some(Encoder::Counts(Box::new(source)));
        self.retype()
    }

    pub fn with_channel(mut self, channel: u8) -> MotorLoopBuilder<E, Set> {
        self.channel = Some(channel);
        self.retype()
    }

    /// Apply every setting from a motor config, channel included.
    pub fn with_config(mut self, cfg: &MotorCfg) -> MotorLoopBuilder<E, Set> {
        self.channel = Some(cfg.channel);
        self.name = Some(cfg.name.clone());
        self.cfg = cfg.clone();
        self.retype()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_pid(mut self, pid: PidCfg) -> Self {
        self.cfg.pid = pid;
        self
    }

    pub fn with_counts_per_rev(mut self, cpr: f64) -> Self {
        self.cfg.counts_per_rev = cpr;
        self
    }

    pub fn with_gear_ratio(mut self, ratio: f64) -> Self {
        self.cfg.gear_ratio = ratio;
        self
    }

    pub fn with_speed_gain(mut self, gain: f64) -> Self {
        self.cfg.speed_gain = gain;
        self
    }

    pub fn with_reference(mut self, rev: f64) -> Self {
        self.cfg.reference_rev = rev;
        self
    }

    pub fn enabled(mut self, on: bool) -> Self {
        self.cfg.enabled = on;
        self
    }

    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<MotorLoop> {
        let encoder = self
            .encoder
            .ok_or_else(|| eyre::Report::new(BuildError::MissingEncoder))?;
        let channel = self
            .channel
            .ok_or_else(|| eyre::Report::new(BuildError::MissingChannel))?;
        let cfg = self.cfg;

        if !(cfg.counts_per_rev.is_finite() && cfg.counts_per_rev > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "counts_per_rev must be > 0",
            )));
        }
        if !cfg.gear_ratio.is_finite() || cfg.gear_ratio == 0.0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "gear_ratio must be finite and non-zero",
            )));
        }
        if !(cfg.speed_gain.is_finite() && cfg.speed_gain > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "speed_gain must be > 0",
            )));
        }
        if !cfg.reference_rev.is_finite() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "reference must be finite",
            )));
        }

        let last_count = match &encoder {
            Encoder::Decoder(d) => d.count(),
            Encoder::Counts(c) => c.count(),
        };
        let shared = Arc::new(MotorShared::default());
        shared
            .reference
            .store(cfg.reference_rev, std::sync::atomic::Ordering::Release);
        shared
            .enabled
            .store(cfg.enabled, std::sync::atomic::Ordering::Release);
        let (retune_tx, retune_rx) = xch::bounded(RETUNE_QUEUE);

        Ok(MotorLoop {
            name: Arc::from(self.name.unwrap_or(cfg.name)),
            channel,
            encoder,
            pid: PidController::new(&cfg.pid),
            counts_per_rev: cfg.counts_per_rev,
            gear_ratio: cfg.gear_ratio,
            speed_gain: cfg.speed_gain,
            last_count,
            position: 0.0,
            // Starting enabled counts as a transition so the PID is primed.
            was_enabled: false,
            shared,
            retune_tx,
            retune_rx,
        })
    }
}

impl MotorLoopBuilder<Set, Set> {
    /// Build with compile-time guarantees that encoder and channel are set.
    pub fn build(self) -> Result<MotorLoop> {
        self.try_build()
    }
}
