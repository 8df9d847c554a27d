//! Simulated encoder, actuator driver and shaft plant.
//!
//! A `SimShaft` is the shared piece of physics: the driver writes the commanded
//! speed, the encoder integrates it into quadrature steps. The encoder hands
//! out exactly one step per consumed edge, so the levels a decoder re-samples
//! after an edge are always the ones that edge produced.
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use motorloop_traits::{
    ACTUATOR_SPEED_MAX, ActuatorDriver, BoxError, Channel, Clock, EdgeEvent, EdgeSource,
    MonotonicClock, Ready, clamp_speed,
};

/// Forward rotation walks this sequence; each neighbour differs in one bit.
const PHASES: [(bool, bool); 4] = [(false, false), (false, true), (true, true), (true, false)];

/// Upper bound on generated-but-unconsumed steps; beyond it steps are lost,
/// like edges a kernel buffer overflowed on.
const MAX_PENDING_STEPS: usize = 4096;

/// Poll granularity while no step is pending.
const IDLE_POLL: Duration = Duration::from_micros(200);

/// Shared motor shaft: commanded speed in, rotation rate out.
#[derive(Debug)]
pub struct SimShaft {
    speed: AtomicI32,
    /// Quadrature counts per second at full speed (`ACTUATOR_SPEED_MAX`).
    full_speed_cps: f64,
}

impl SimShaft {
    pub fn new(full_speed_cps: f64) -> Arc<Self> {
        Arc::new(Self {
            speed: AtomicI32::new(0),
            full_speed_cps,
        })
    }

    pub fn set_speed(&self, speed: i16) {
        self.speed.store(i32::from(clamp_speed(speed)), Ordering::Relaxed);
    }

    pub fn speed(&self) -> i16 {
        self.speed.load(Ordering::Relaxed) as i16
    }

    /// Current rotation rate in quadrature counts per second (signed).
    pub fn counts_per_sec(&self) -> f64 {
        f64::from(self.speed()) / f64::from(ACTUATOR_SPEED_MAX) * self.full_speed_cps
    }
}

#[derive(Debug, Clone, Copy)]
struct Step {
    forward: bool,
    timestamp_us: u64,
}

/// Edge source backed by a `SimShaft`.
pub struct SimulatedEncoder<C: Clock = MonotonicClock> {
    shaft: Arc<SimShaft>,
    clock: C,
    epoch: Instant,
    last_us: u64,
    frac: f64,
    phase: usize,
    pending: VecDeque<Step>,
    dropped: u64,
}

impl SimulatedEncoder<MonotonicClock> {
    pub fn new(shaft: Arc<SimShaft>) -> Self {
        Self::with_clock(shaft, MonotonicClock::new())
    }
}

impl<C: Clock> SimulatedEncoder<C> {
    pub fn with_clock(shaft: Arc<SimShaft>, clock: C) -> Self {
        let epoch = clock.now();
        Self {
            shaft,
            clock,
            epoch,
            last_us: 0,
            frac: 0.0,
            phase: 0,
            pending: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Steps lost because the pending queue was full.
    pub fn dropped_steps(&self) -> u64 {
        self.dropped
    }

    fn now_us(&self) -> u64 {
        let us = self
            .clock
            .now()
            .saturating_duration_since(self.epoch)
            .as_micros();
        us.min(u128::from(u64::MAX)) as u64
    }

    /// Integrate the shaft rate since the last call into pending steps,
    /// spreading their timestamps over the elapsed interval.
    fn integrate(&mut self) {
        let now_us = self.now_us();
        let rate = self.shaft.counts_per_sec();
        let dt_s = now_us.saturating_sub(self.last_us) as f64 / 1e6;
        let start = self.frac;
        self.frac += rate * dt_s;

        if rate != 0.0 {
            let forward = rate > 0.0;
            let sign = if forward { 1.0 } else { -1.0 };
            let mut k = 1.0;
            while self.frac * sign >= 1.0 {
                let secs = ((k - start * sign) / rate.abs()).max(0.0);
                let ts = (self.last_us + (secs * 1e6) as u64).min(now_us);
                if self.pending.len() < MAX_PENDING_STEPS {
                    self.pending.push_back(Step {
                        forward,
                        timestamp_us: ts,
                    });
                } else {
                    self.dropped = self.dropped.saturating_add(1);
                }
                self.frac -= sign;
                k += 1.0;
            }
        }
        self.last_us = now_us;
    }

    fn next_phase(&self, forward: bool) -> usize {
        if forward {
            (self.phase + 1) % PHASES.len()
        } else {
            (self.phase + PHASES.len() - 1) % PHASES.len()
        }
    }

    /// The channel whose level flips when `step` is applied.
    fn step_channel(&self, step: Step) -> Channel {
        let (a0, _) = PHASES[self.phase];
        let (a1, _) = PHASES[self.next_phase(step.forward)];
        if a0 != a1 { Channel::A } else { Channel::B }
    }

    fn readiness(&self) -> Ready {
        match self.pending.front() {
            Some(step) => match self.step_channel(*step) {
                Channel::A => Ready { a: true, b: false },
                Channel::B => Ready { a: false, b: true },
            },
            None => Ready::NONE,
        }
    }
}

impl<C: Clock> EdgeSource for SimulatedEncoder<C> {
    fn level(&mut self, channel: Channel) -> Result<bool, BoxError> {
        let (a, b) = PHASES[self.phase];
        Ok(match channel {
            Channel::A => a,
            Channel::B => b,
        })
    }

    fn wait(&mut self, timeout: Duration) -> Result<Ready, BoxError> {
        let deadline = self.clock.now() + timeout;
        loop {
            self.integrate();
            let ready = self.readiness();
            if ready.any() {
                return Ok(ready);
            }
            let now = self.clock.now();
            if now >= deadline {
                return Ok(Ready::NONE);
            }
            self.clock
                .sleep(IDLE_POLL.min(deadline.saturating_duration_since(now)));
        }
    }

    fn read_edge(&mut self, channel: Channel) -> Result<Option<EdgeEvent>, BoxError> {
        let Some(step) = self.pending.front().copied() else {
            return Ok(None);
        };
        if self.step_channel(step) != channel {
            return Ok(None);
        }
        self.pending.pop_front();
        self.phase = self.next_phase(step.forward);
        Ok(Some(EdgeEvent {
            timestamp_us: step.timestamp_us,
        }))
    }
}

/// Counters a test or the CLI can read after the driver moved into a loop.
#[derive(Debug, Default)]
pub struct DriverLog {
    commands: AtomicU64,
    coasts: AtomicU64,
}

impl DriverLog {
    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }
    pub fn coasts(&self) -> u64 {
        self.coasts.load(Ordering::Relaxed)
    }
}

/// Actuator driver that moves attached `SimShaft`s instead of hardware.
pub struct SimulatedDriver {
    shafts: Vec<(u8, Arc<SimShaft>)>,
    enabled: bool,
    log: Arc<DriverLog>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self {
            shafts: Vec::new(),
            enabled: false,
            log: Arc::new(DriverLog::default()),
        }
    }

    /// Route a driver channel to a shaft.
    pub fn attach(&mut self, channel: u8, shaft: Arc<SimShaft>) {
        self.shafts.retain(|(ch, _)| *ch != channel);
        self.shafts.push((channel, shaft));
    }

    pub fn log(&self) -> Arc<DriverLog> {
        self.log.clone()
    }
}

impl ActuatorDriver for SimulatedDriver {
    fn init(&mut self) -> Result<(), BoxError> {
        tracing::debug!("simulated driver init");
        self.enabled = true;
        Ok(())
    }

    fn set_speed(&mut self, channel: u8, speed: i16) -> Result<(), BoxError> {
        if !self.enabled {
            return Ok(());
        }
        let speed = clamp_speed(speed);
        for (_, shaft) in self.shafts.iter().filter(|(ch, _)| *ch == channel) {
            shaft.set_speed(speed);
        }
        self.log.commands.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(channel, speed, "sim set_speed");
        Ok(())
    }

    fn coast_all(&mut self) -> Result<(), BoxError> {
        for (_, shaft) in &self.shafts {
            shaft.set_speed(0);
        }
        self.log.coasts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn enable(&mut self, on: bool) -> Result<(), BoxError> {
        self.enabled = on;
        if !on {
            self.coast_all()?;
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motorloop_traits::ManualClock;

    fn levels<C: Clock>(enc: &mut SimulatedEncoder<C>) -> (bool, bool) {
        (
            enc.level(Channel::A).unwrap(),
            enc.level(Channel::B).unwrap(),
        )
    }

    #[test]
    fn forward_rotation_walks_gray_sequence() {
        let clock = ManualClock::new();
        let shaft = SimShaft::new(1_000.0);
        shaft.set_speed(ACTUATOR_SPEED_MAX);
        let mut enc = SimulatedEncoder::with_clock(shaft, clock.clone());

        clock.advance(Duration::from_millis(4)); // 4 counts at 1000 cps
        let mut seen = vec![levels(&mut enc)];
        for _ in 0..4 {
            let ready = enc.wait(Duration::ZERO).unwrap();
            let ch = if ready.a { Channel::A } else { Channel::B };
            assert!(enc.read_edge(ch).unwrap().is_some());
            seen.push(levels(&mut enc));
        }
        assert_eq!(
            seen,
            vec![
                (false, false),
                (false, true),
                (true, true),
                (true, false),
                (false, false)
            ]
        );
    }

    #[test]
    fn read_edge_on_wrong_channel_consumes_nothing() {
        let clock = ManualClock::new();
        let shaft = SimShaft::new(1_000.0);
        shaft.set_speed(ACTUATOR_SPEED_MAX);
        let mut enc = SimulatedEncoder::with_clock(shaft, clock.clone());
        clock.advance(Duration::from_millis(1));
        let ready = enc.wait(Duration::ZERO).unwrap();
        assert!(ready.b && !ready.a);
        assert_eq!(enc.read_edge(Channel::A).unwrap(), None);
        assert!(enc.read_edge(Channel::B).unwrap().is_some());
    }

    #[test]
    fn stationary_shaft_times_out_without_edges() {
        let clock = ManualClock::new();
        let shaft = SimShaft::new(1_000.0);
        let mut enc = SimulatedEncoder::with_clock(shaft, clock);
        assert_eq!(enc.wait(Duration::from_millis(2)).unwrap(), Ready::NONE);
    }

    #[test]
    fn driver_ignores_speed_until_init_and_coasts_on_disable() {
        let shaft = SimShaft::new(1_000.0);
        let mut drv = SimulatedDriver::new();
        drv.attach(1, shaft.clone());

        drv.set_speed(1, 400).unwrap();
        assert_eq!(shaft.speed(), 0);

        drv.init().unwrap();
        drv.set_speed(1, 2_000).unwrap();
        assert_eq!(shaft.speed(), ACTUATOR_SPEED_MAX);

        drv.enable(false).unwrap();
        assert_eq!(shaft.speed(), 0);
        assert_eq!(drv.log().coasts(), 1);
    }
}
