//! Test and helper mocks for motorloop_core.
//!
//! `ScriptedEdges` replays edges fed from another thread through an
//! `EdgeScript`; `RecordingDriver` keeps every actuator call for inspection.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel as xch;
use motorloop_traits::{ActuatorDriver, BoxError, Channel, EdgeEvent, EdgeSource, Ready};

#[derive(Debug, Clone, Copy)]
enum Step {
    /// An edge on `channel`; afterwards the lines read `levels`, or fail when `None`.
    Edge {
        channel: Channel,
        timestamp_us: u64,
        levels: Option<(bool, bool)>,
    },
    /// The next `wait` returns an error.
    WaitError,
}

/// Feeding side of a `ScriptedEdges` source.
#[derive(Debug, Clone)]
pub struct EdgeScript {
    tx: xch::Sender<Step>,
}

impl EdgeScript {
    /// Queue an edge; after it is read the lines show `(a, b)`.
    pub fn edge(&self, channel: Channel, timestamp_us: u64, levels: (bool, bool)) {
        let _ = self.tx.send(Step::Edge {
            channel,
            timestamp_us,
            levels: Some(levels),
        });
    }

    /// Queue an edge whose follow-up level read fails.
    pub fn edge_with_failed_read(&self, channel: Channel, timestamp_us: u64) {
        let _ = self.tx.send(Step::Edge {
            channel,
            timestamp_us,
            levels: None,
        });
    }

    /// Queue a failure of the wait primitive itself.
    pub fn wait_error(&self) {
        let _ = self.tx.send(Step::WaitError);
    }
}

/// Edge source driven by an `EdgeScript`.
#[derive(Debug)]
pub struct ScriptedEdges {
    rx: xch::Receiver<Step>,
    next: Option<Step>,
    levels: (bool, bool),
    fail_levels: bool,
    released: Arc<AtomicBool>,
}

impl ScriptedEdges {
    /// New source with the given initial `(a, b)` levels.
    pub fn new(levels: (bool, bool)) -> (Self, EdgeScript) {
        let (tx, rx) = xch::unbounded();
        let src = Self {
            rx,
            next: None,
            levels,
            fail_levels: false,
            released: Arc::new(AtomicBool::new(false)),
        };
        (src, EdgeScript { tx })
    }

    /// Every level read fails, including the initial one.
    pub fn failing_levels(mut self) -> Self {
        self.fail_levels = true;
        self
    }

    /// Becomes `true` once the source is dropped.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl Drop for ScriptedEdges {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl EdgeSource for ScriptedEdges {
    fn level(&mut self, channel: Channel) -> Result<bool, BoxError> {
        if self.fail_levels {
            return Err("scripted level failure".into());
        }
        Ok(match channel {
            Channel::A => self.levels.0,
            Channel::B => self.levels.1,
        })
    }

    fn wait(&mut self, timeout: Duration) -> Result<Ready, BoxError> {
        if self.next.is_none() {
            self.next = self.rx.recv_timeout(timeout).ok();
        }
        match self.next {
            None => Ok(Ready::NONE),
            Some(Step::WaitError) => {
                self.next = None;
                Err("scripted wait failure".into())
            }
            Some(Step::Edge { channel, .. }) => Ok(Ready {
                a: channel == Channel::A,
                b: channel == Channel::B,
            }),
        }
    }

    fn read_edge(&mut self, channel: Channel) -> Result<Option<EdgeEvent>, BoxError> {
        match self.next {
            Some(Step::Edge {
                channel: ch,
                timestamp_us,
                levels,
            }) if ch == channel => {
                self.next = None;
                match levels {
                    Some(l) => {
                        self.levels = l;
                        self.fail_levels = false;
                    }
                    None => self.fail_levels = true,
                }
                Ok(Some(EdgeEvent { timestamp_us }))
            }
            _ => Ok(None),
        }
    }
}

/// One call made on a `RecordingDriver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    Init,
    SetSpeed(u8, i16),
    CoastAll,
    Enable(bool),
}

/// Driver that records calls; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    calls: Arc<Mutex<Vec<DriverCall>>>,
    fail: Arc<AtomicBool>,
    enabled: bool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the call log; stays valid after the driver moves threads.
    pub fn log(&self) -> Arc<Mutex<Vec<DriverCall>>> {
        self.calls.clone()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<DriverCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .copied()
    }

    /// While set, every call fails (and is still recorded).
    pub fn set_failing(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }

    fn record(&self, call: DriverCall) -> Result<(), BoxError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Box::new(std::io::Error::other("recording driver failure")));
        }
        Ok(())
    }
}

impl ActuatorDriver for RecordingDriver {
    fn init(&mut self) -> Result<(), BoxError> {
        self.record(DriverCall::Init)?;
        self.enabled = true;
        Ok(())
    }

    fn set_speed(&mut self, channel: u8, speed: i16) -> Result<(), BoxError> {
        self.record(DriverCall::SetSpeed(
            channel,
            motorloop_traits::clamp_speed(speed),
        ))
    }

    fn coast_all(&mut self) -> Result<(), BoxError> {
        self.record(DriverCall::CoastAll)
    }

    fn enable(&mut self, on: bool) -> Result<(), BoxError> {
        self.record(DriverCall::Enable(on))?;
        self.enabled = on;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
