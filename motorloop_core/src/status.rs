//! Per-motor health snapshot for housekeeping reports.

/// Point-in-time view of one motor, assembled from its handle's atomics.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorReport {
    pub name: String,
    /// Output-shaft position in revolutions.
    pub position: f64,
    pub reference: f64,
    /// Last computed actuator command (also recorded while disabled).
    pub command: i16,
    pub enabled: bool,
    pub illegal_transitions: u64,
    pub driver_faults: u64,
    /// The decoder thread stopped after its edge source failed.
    pub encoder_faulted: bool,
}

impl MotorReport {
    /// Position error in revolutions.
    pub fn error(&self) -> f64 {
        self.reference - self.position
    }
}
