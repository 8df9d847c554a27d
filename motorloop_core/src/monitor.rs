//! Fixed-period scheduling with deadline accounting.
//!
//! Each iteration is timed from `begin_iteration` to `end_iteration`. An
//! iteration that ends after `start + period` is a miss; otherwise the
//! monitor waits out the rest of the period on the clock (active wait, no
//! sleep). Counters live in atomics so a reporting thread can read and reset
//! a window while the loop keeps running.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use motorloop_traits::{Clock, MonotonicClock};

use crate::cancel::CancelToken;
use crate::util::saturating_nanos;

#[derive(Debug, Default)]
struct Window {
    iterations: AtomicU64,
    misses: AtomicU64,
    worst_overrun_ns: AtomicU64,
    busy_ns: AtomicU64,
}

/// Counters for one reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub misses: u64,
    pub worst_overrun: Duration,
    /// Time spent between begin and end, summed over the window.
    pub busy: Duration,
}

/// Reader side of a `DeadlineMonitor`; cheap to clone and `Send`.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    name: Arc<str>,
    window: Arc<Window>,
}

impl StatsHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the current window and start a new one. Each field is swapped
    /// individually, so an iteration that lands mid-swap is counted in
    /// exactly one window.
    pub fn snapshot_and_reset(&self) -> LoopStats {
        let w = &self.window;
        LoopStats {
            iterations: w.iterations.swap(0, Ordering::AcqRel),
            misses: w.misses.swap(0, Ordering::AcqRel),
            worst_overrun: Duration::from_nanos(w.worst_overrun_ns.swap(0, Ordering::AcqRel)),
            busy: Duration::from_nanos(w.busy_ns.swap(0, Ordering::AcqRel)),
        }
    }
}

pub struct DeadlineMonitor<C: Clock = MonotonicClock> {
    clock: C,
    start: Option<Instant>,
    handle: StatsHandle,
}

impl DeadlineMonitor<MonotonicClock> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, MonotonicClock::new())
    }
}

impl<C: Clock> DeadlineMonitor<C> {
    pub fn with_clock(name: impl Into<String>, clock: C) -> Self {
        Self {
            clock,
            start: None,
            handle: StatsHandle {
                name: Arc::from(name.into()),
                window: Arc::new(Window::default()),
            },
        }
    }

    pub fn stats_handle(&self) -> StatsHandle {
        self.handle.clone()
    }

    pub fn snapshot_and_reset(&self) -> LoopStats {
        self.handle.snapshot_and_reset()
    }

    pub fn begin_iteration(&mut self) {
        self.start = Some(self.clock.now());
    }

    /// Close the iteration. Returns the overrun on a miss; otherwise returns
    /// `None` once the deadline has been reached.
    pub fn end_iteration(&mut self, period: Duration) -> Option<Duration> {
        let end = self.clock.now();
        // Without a matching begin the iteration is zero-length.
        let start = self.start.take().unwrap_or(end);
        let w = &self.handle.window;

        w.iterations.fetch_add(1, Ordering::Relaxed);
        w.busy_ns.fetch_add(
            saturating_nanos(end.saturating_duration_since(start)),
            Ordering::Relaxed,
        );

        // A period too large to add to `start` has no reachable deadline.
        let deadline = start.checked_add(period)?;
        if end > deadline {
            let overrun = end - deadline;
            w.misses.fetch_add(1, Ordering::Relaxed);
            w.worst_overrun_ns
                .fetch_max(saturating_nanos(overrun), Ordering::Relaxed);
            tracing::trace!(loop_name = %self.handle.name, ?overrun, "deadline missed");
            Some(overrun)
        } else {
            self.clock.spin_until(deadline);
            None
        }
    }
}

/// Runs a body at a fixed period until cancelled.
pub struct LoopScheduler<C: Clock = MonotonicClock> {
    monitor: DeadlineMonitor<C>,
    period: Duration,
}

impl<C: Clock> LoopScheduler<C> {
    pub fn new(monitor: DeadlineMonitor<C>, period: Duration) -> Self {
        Self { monitor, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats_handle(&self) -> StatsHandle {
        self.monitor.stats_handle()
    }

    /// `begin → body → end` until `cancel` fires. Returns iterations run.
    pub fn run(&mut self, cancel: &CancelToken, mut body: impl FnMut()) -> u64 {
        let mut n = 0u64;
        while !cancel.is_cancelled() {
            self.monitor.begin_iteration();
            body();
            self.monitor.end_iteration(self.period);
            n += 1;
        }
        n
    }
}
