//! Hardware adapters for the motor control core.
//!
//! The simulated stack is always available; real GPIO and I2C backends are
//! behind the `hardware` feature (Linux only).
pub mod error;
pub mod motoron;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;

pub use error::HwError;
pub use sim::{DriverLog, SimShaft, SimulatedDriver, SimulatedEncoder};

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use gpio::GpioEdgeSource;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use motoron::Motoron;
