//! Quadrature decoding on a dedicated thread.
//!
//! The worker owns the `EdgeSource`, blocks on it with a bounded wait, and
//! publishes the running count through `EncoderCounters`. Readers on other
//! threads only ever see whole updates; there is a single writer.
//!
//! Safety: each `QuadratureDecoder` spawns exactly one thread, which is
//! cancelled and joined when the decoder is dropped.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use motorloop_traits::{BoxError, Channel, EdgeSource};

use crate::cancel::CancelToken;
use crate::config::DecoderCfg;
use crate::error::{ControlError, Result};
use crate::hw_error::map_hw_error;

/// Count delta for `QDELTA[old][new]`, phases encoded as `(A << 1) | B`.
///
/// Gray-code order is 00 → 01 → 11 → 10 → 00 forward. A zero off the diagonal
/// is a transition where both lines flipped at once.
pub const QDELTA: [[i8; 4]; 4] = [
    [0, 1, -1, 0],  // 00 ->
    [-1, 0, 0, 1],  // 01 ->
    [1, 0, 0, -1],  // 10 ->
    [0, -1, 1, 0],  // 11 ->
];

/// Outcome of applying one sampled phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Valid single-line change; +1 forward, -1 reverse.
    Step(i8),
    /// Same phase as before (e.g. a glitch that settled back).
    Hold,
    /// Both lines changed; direction is unknowable.
    Illegal,
}

#[inline]
pub fn phase_of(a: bool, b: bool) -> u8 {
    (u8::from(a) << 1) | u8::from(b)
}

pub fn classify(old: u8, new: u8) -> Transition {
    let (old, new) = (old & 0b11, new & 0b11);
    match QDELTA[usize::from(old)][usize::from(new)] {
        0 if old != new => Transition::Illegal,
        0 => Transition::Hold,
        d => Transition::Step(d),
    }
}

/// Shared decoder state. The worker thread is the only writer apart from
/// `reset()`, which touches the count and illegal counter only, and
/// `set_debounce_us()`, which owns the debounce window. The worker only reads
/// the window, once per edge.
#[derive(Debug, Default)]
pub struct EncoderCounters {
    count: AtomicI64,
    illegal: AtomicU64,
    phase: AtomicU8,
    faulted: AtomicBool,
    debounce_us: AtomicU64,
}

impl EncoderCounters {
    pub fn new(initial_phase: u8) -> Self {
        Self {
            phase: AtomicU8::new(initial_phase & 0b11),
            ..Self::default()
        }
    }

    #[inline]
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn illegal_count(&self) -> u64 {
        self.illegal.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> u8 {
        self.phase.load(Ordering::Relaxed)
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Zero the count and the illegal counter; the tracked phase is kept.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.illegal.store(0, Ordering::Relaxed);
    }

    pub fn debounce_us(&self) -> u64 {
        self.debounce_us.load(Ordering::Relaxed)
    }

    /// Change the debounce window; the worker picks it up on its next edge.
    pub fn set_debounce_us(&self, us: u64) {
        self.debounce_us.store(us, Ordering::Relaxed);
    }

    /// Apply a freshly sampled phase. Must only be called by the single writer.
    pub fn apply(&self, new_phase: u8) -> Transition {
        let t = classify(self.phase.load(Ordering::Relaxed), new_phase);
        match t {
            Transition::Step(d) => {
                self.count.fetch_add(i64::from(d), Ordering::Relaxed);
            }
            Transition::Illegal => {
                self.illegal.fetch_add(1, Ordering::Relaxed);
            }
            Transition::Hold => {}
        }
        self.phase.store(new_phase & 0b11, Ordering::Relaxed);
        t
    }

    fn mark_faulted(&self) {
        self.faulted.store(true, Ordering::Release);
    }
}

/// Anything the motor loop can read a position count from.
pub trait CountSource {
    fn count(&self) -> i64;
    fn illegal_count(&self) -> u64;
    fn is_faulted(&self) -> bool {
        false
    }
    /// Zero the count; used when re-homing.
    fn reset(&self);
    /// Sources without an edge filter ignore this.
    fn set_debounce_us(&self, _us: u64) {}
}

impl CountSource for EncoderCounters {
    fn count(&self) -> i64 {
        Self::count(self)
    }
    fn illegal_count(&self) -> u64 {
        Self::illegal_count(self)
    }
    fn is_faulted(&self) -> bool {
        Self::is_faulted(self)
    }
    fn reset(&self) {
        Self::reset(self);
    }
    fn set_debounce_us(&self, us: u64) {
        Self::set_debounce_us(self, us);
    }
}

impl<T: CountSource + ?Sized> CountSource for Arc<T> {
    fn count(&self) -> i64 {
        (**self).count()
    }
    fn illegal_count(&self) -> u64 {
        (**self).illegal_count()
    }
    fn is_faulted(&self) -> bool {
        (**self).is_faulted()
    }
    fn reset(&self) {
        (**self).reset();
    }
    fn set_debounce_us(&self, us: u64) {
        (**self).set_debounce_us(us);
    }
}

/// Per-channel debounce. The stored timestamp moves on every edge, rejected
/// ones included, so a burst of chatter keeps being rejected until it stops.
#[derive(Debug, Clone)]
pub struct EdgeFilter {
    debounce_us: u64,
    last_us: [Option<u64>; 2],
}

impl EdgeFilter {
    pub fn new(debounce_us: u64) -> Self {
        Self {
            debounce_us,
            last_us: [None; 2],
        }
    }

    pub fn debounce_us(&self) -> u64 {
        self.debounce_us
    }

    pub fn set_debounce_us(&mut self, us: u64) {
        self.debounce_us = us;
    }

    /// `true` when the edge should be applied.
    pub fn accept(&mut self, channel: Channel, timestamp_us: u64) -> bool {
        let slot = &mut self.last_us[match channel {
            Channel::A => 0,
            Channel::B => 1,
        }];
        let bounce = match *slot {
            Some(prev) if self.debounce_us > 0 => {
                timestamp_us.saturating_sub(prev) < self.debounce_us
            }
            _ => false,
        };
        *slot = Some(timestamp_us);
        !bounce
    }
}

fn sample_phase<E: EdgeSource + ?Sized>(source: &mut E) -> std::result::Result<u8, BoxError> {
    let a = source.level(Channel::A)?;
    let b = source.level(Channel::B)?;
    Ok(phase_of(a, b))
}

/// The decoder's event loop body, usable without a thread.
pub struct EdgePump<E> {
    source: E,
    counters: Arc<EncoderCounters>,
    filter: EdgeFilter,
    wait_timeout: Duration,
}

impl<E: EdgeSource> EdgePump<E> {
    /// Seeds the shared debounce window from `cfg`.
    pub fn new(source: E, counters: Arc<EncoderCounters>, cfg: &DecoderCfg) -> Self {
        counters.set_debounce_us(cfg.debounce_us);
        Self {
            source,
            counters,
            filter: EdgeFilter::new(cfg.debounce_us),
            wait_timeout: cfg.wait_timeout,
        }
    }

    pub fn counters(&self) -> &Arc<EncoderCounters> {
        &self.counters
    }

    /// One bounded wait, then at most one edge per ready channel.
    /// Returns how many edges were applied to the counters.
    pub fn pump(&mut self) -> std::result::Result<usize, BoxError> {
        let ready = self.source.wait(self.wait_timeout)?;
        let mut applied = 0;
        for ch in Channel::BOTH {
            if ready.is_ready(ch) && self.service(ch).is_some() {
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn service(&mut self, channel: Channel) -> Option<Transition> {
        let ev = match self.source.read_edge(channel) {
            Ok(Some(ev)) => ev,
            Ok(None) => return None,
            Err(e) => {
                tracing::trace!(?channel, error = %e, "edge read failed; dropped");
                return None;
            }
        };
        self.filter.set_debounce_us(self.counters.debounce_us());
        if !self.filter.accept(channel, ev.timestamp_us) {
            tracing::trace!(?channel, ts_us = ev.timestamp_us, "debounced");
            return None;
        }
        // Levels are re-read rather than inferred from the edge.
        let phase = match sample_phase(&mut self.source) {
            Ok(p) => p,
            Err(e) => {
                tracing::trace!(?channel, error = %e, "level read failed; edge dropped");
                return None;
            }
        };
        let t = self.counters.apply(phase);
        if t == Transition::Illegal {
            tracing::trace!(?channel, phase, "illegal transition");
        }
        Some(t)
    }

    fn run(mut self, name: &str, cancel: &CancelToken) {
        while !cancel.is_cancelled() {
            if let Err(e) = self.pump() {
                tracing::error!(encoder = name, error = %e, "edge wait failed; decoder stopped");
                self.counters.mark_faulted();
                break;
            }
        }
        tracing::trace!(encoder = name, "decoder thread exiting");
    }
}

pub struct QuadratureDecoder {
    name: String,
    counters: Arc<EncoderCounters>,
    cancel: CancelToken,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for QuadratureDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadratureDecoder")
            .field("name", &self.name)
            .field("count", &self.count())
            .field("illegal", &self.illegal_count())
            .finish()
    }
}

impl QuadratureDecoder {
    /// Sample the initial phase and start the worker thread. On error the
    /// source has already been dropped, releasing its lines.
    pub fn spawn<E: EdgeSource + Send + 'static>(
        name: impl Into<String>,
        mut source: E,
        cfg: &DecoderCfg,
        parent: &CancelToken,
    ) -> Result<Self> {
        let name = name.into();
        let phase = sample_phase(&mut source)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err_with(|| format!("encoder {name}: initial level read"))?;

        let counters = Arc::new(EncoderCounters::new(phase));
        let cancel = parent.child();
        let pump = EdgePump::new(source, counters.clone(), cfg);
        let thread_cancel = cancel.clone();
        let thread_name = name.clone();
        let join_handle = std::thread::Builder::new()
            .name(format!("enc-{name}"))
            .spawn(move || pump.run(&thread_name, &thread_cancel))
            .map_err(|e| eyre::Report::new(ControlError::Io(e.to_string())))
            .wrap_err_with(|| format!("encoder {name}: spawn decoder thread"))?;

        tracing::debug!(encoder = %name, phase, "decoder started");
        Ok(Self {
            name,
            counters,
            cancel,
            join_handle: Some(join_handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> i64 {
        self.counters.count()
    }

    pub fn illegal_count(&self) -> u64 {
        self.counters.illegal_count()
    }

    pub fn reset(&self) {
        self.counters.reset();
    }

    pub fn is_faulted(&self) -> bool {
        self.counters.is_faulted()
    }

    pub fn debounce_us(&self) -> u64 {
        self.counters.debounce_us()
    }

    /// Takes effect from the next edge the worker services.
    pub fn set_debounce_us(&self, us: u64) {
        tracing::debug!(encoder = %self.name, us, "debounce window changed");
        self.counters.set_debounce_us(us);
    }

    /// Shared counters, for readers that outlive a borrow of the decoder.
    pub fn counters(&self) -> Arc<EncoderCounters> {
        self.counters.clone()
    }
}

impl CountSource for QuadratureDecoder {
    fn count(&self) -> i64 {
        Self::count(self)
    }
    fn illegal_count(&self) -> u64 {
        Self::illegal_count(self)
    }
    fn is_faulted(&self) -> bool {
        Self::is_faulted(self)
    }
    fn reset(&self) {
        Self::reset(self);
    }
    fn set_debounce_us(&self, us: u64) {
        Self::set_debounce_us(self, us);
    }
}

impl Drop for QuadratureDecoder {
    fn drop(&mut self) {
        self.cancel.cancel();
        // Returns within one wait timeout; the source is dropped on that thread.
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!(encoder = %self.name, "decoder thread joined"),
                Err(e) => tracing::warn!(encoder = %self.name, ?e, "decoder thread panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0b00, 0b01, Transition::Step(1))]
    #[case(0b01, 0b11, Transition::Step(1))]
    #[case(0b11, 0b10, Transition::Step(1))]
    #[case(0b10, 0b00, Transition::Step(1))]
    #[case(0b00, 0b10, Transition::Step(-1))]
    #[case(0b10, 0b11, Transition::Step(-1))]
    #[case(0b11, 0b01, Transition::Step(-1))]
    #[case(0b01, 0b00, Transition::Step(-1))]
    #[case(0b00, 0b11, Transition::Illegal)]
    #[case(0b11, 0b00, Transition::Illegal)]
    #[case(0b01, 0b10, Transition::Illegal)]
    #[case(0b10, 0b01, Transition::Illegal)]
    #[case(0b00, 0b00, Transition::Hold)]
    #[case(0b01, 0b01, Transition::Hold)]
    #[case(0b10, 0b10, Transition::Hold)]
    #[case(0b11, 0b11, Transition::Hold)]
    fn every_transition_is_classified(#[case] old: u8, #[case] new: u8, #[case] want: Transition) {
        assert_eq!(classify(old, new), want);
    }

    #[test]
    fn full_forward_cycle_counts_four() {
        let c = EncoderCounters::new(0b00);
        for p in [0b01, 0b11, 0b10, 0b00] {
            c.apply(p);
        }
        assert_eq!(c.count(), 4);
        for p in [0b10, 0b11, 0b01, 0b00] {
            c.apply(p);
        }
        assert_eq!(c.count(), 0);
        assert_eq!(c.illegal_count(), 0);
    }

    #[test]
    fn illegal_leaves_count_and_tracks_new_phase() {
        let c = EncoderCounters::new(0b00);
        assert_eq!(c.apply(0b11), Transition::Illegal);
        assert_eq!(c.count(), 0);
        assert_eq!(c.illegal_count(), 1);
        assert_eq!(c.phase(), 0b11);
        // From 11, 10 is a forward step.
        assert_eq!(c.apply(0b10), Transition::Step(1));
    }

    #[test]
    fn reset_keeps_phase() {
        let c = EncoderCounters::new(0b00);
        c.apply(0b01);
        c.apply(0b10);
        c.reset();
        assert_eq!((c.count(), c.illegal_count()), (0, 0));
        assert_eq!(c.phase(), 0b10);
    }

    #[test]
    fn debounce_is_per_channel_and_tracks_rejected_edges() {
        let mut f = EdgeFilter::new(5);
        assert!(f.accept(Channel::A, 100));
        assert!(!f.accept(Channel::A, 103));
        // Spacing is measured from the rejected edge at 103.
        assert!(!f.accept(Channel::A, 106));
        assert!(f.accept(Channel::A, 111));
        // B has its own history.
        assert!(f.accept(Channel::B, 112));
    }

    #[test]
    fn zero_debounce_accepts_everything() {
        let mut f = EdgeFilter::new(0);
        assert!(f.accept(Channel::A, 10));
        assert!(f.accept(Channel::A, 10));
        assert!(f.accept(Channel::A, 9));
    }
}
