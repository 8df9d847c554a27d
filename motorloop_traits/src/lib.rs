//! Hardware-facing traits shared by the control core and the adapters.
//!
//! Errors cross these boundaries as `Box<dyn Error + Send + Sync>` so adapters
//! can surface whatever their backend produces; the core maps them to typed
//! errors.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest speed magnitude an actuator channel accepts (native units).
pub const ACTUATOR_SPEED_MAX: i16 = 800;

/// One of the two quadrature input lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub const BOTH: [Channel; 2] = [Channel::A, Channel::B];
}

/// A single edge reported by an edge source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Monotonic timestamp in microseconds, in the source's own time base.
    pub timestamp_us: u64,
}

/// Which channels have at least one pending edge after a wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    pub a: bool,
    pub b: bool,
}

impl Ready {
    pub const NONE: Ready = Ready { a: false, b: false };

    #[inline]
    pub fn any(&self) -> bool {
        self.a || self.b
    }

    #[inline]
    pub fn is_ready(&self, channel: Channel) -> bool {
        match channel {
            Channel::A => self.a,
            Channel::B => self.b,
        }
    }
}

/// Two-channel edge input (an encoder's A/B lines).
///
/// The source is released when dropped.
pub trait EdgeSource {
    /// Read the current level of a channel directly from the line.
    fn level(&mut self, channel: Channel) -> Result<bool, BoxError>;

    /// Block until either channel has a pending edge or `timeout` expires.
    /// A timeout is not an error: it returns `Ready::NONE`.
    fn wait(&mut self, timeout: Duration) -> Result<Ready, BoxError>;

    /// Take one pending edge from a channel, if any.
    fn read_edge(&mut self, channel: Channel) -> Result<Option<EdgeEvent>, BoxError>;
}

/// Multi-channel motor driver.
pub trait ActuatorDriver {
    /// One-time bring-up: drop wire integrity checks, clear latched faults,
    /// then mark the driver enabled. Must run before any `set_speed`.
    fn init(&mut self) -> Result<(), BoxError>;

    /// Command a signed speed on one channel. Implementations clamp to
    /// `±ACTUATOR_SPEED_MAX` and ignore the call while disabled.
    fn set_speed(&mut self, channel: u8, speed: i16) -> Result<(), BoxError>;

    /// Force every channel to a neutral, non-driven state.
    fn coast_all(&mut self) -> Result<(), BoxError>;

    /// Enable or disable output; disabling coasts all channels.
    fn enable(&mut self, on: bool) -> Result<(), BoxError>;

    fn is_enabled(&self) -> bool;
}

impl<T: ActuatorDriver + ?Sized> ActuatorDriver for Box<T> {
    fn init(&mut self) -> Result<(), BoxError> {
        (**self).init()
    }
    fn set_speed(&mut self, channel: u8, speed: i16) -> Result<(), BoxError> {
        (**self).set_speed(channel, speed)
    }
    fn coast_all(&mut self) -> Result<(), BoxError> {
        (**self).coast_all()
    }
    fn enable(&mut self, on: bool) -> Result<(), BoxError> {
        (**self).enable(on)
    }
    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }
}

impl<T: EdgeSource + ?Sized> EdgeSource for Box<T> {
    fn level(&mut self, channel: Channel) -> Result<bool, BoxError> {
        (**self).level(channel)
    }
    fn wait(&mut self, timeout: Duration) -> Result<Ready, BoxError> {
        (**self).wait(timeout)
    }
    fn read_edge(&mut self, channel: Channel) -> Result<Option<EdgeEvent>, BoxError> {
        (**self).read_edge(channel)
    }
}

/// Clamp a speed request into the actuator's native range.
#[inline]
pub fn clamp_speed(speed: i16) -> i16 {
    speed.clamp(-ACTUATOR_SPEED_MAX, ACTUATOR_SPEED_MAX)
}
