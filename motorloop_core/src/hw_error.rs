//! Maps `Box<dyn Error>` from trait boundaries to typed `ControlError`.
//!
//! The traits in `motorloop_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to the typed enum, with an optional feature-gated
//! path for `motorloop_hardware::HwError` downcasting.

use crate::error::ControlError;

/// Map a trait-boundary error to a typed `ControlError`.
///
/// Known hardware error types are downcast first; anything else is reported
/// as a generic hardware error carrying its message.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ControlError {
    #[cfg(feature = "hardware-errors")]
    {
        use motorloop_hardware::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Gpio(_) => ControlError::HardwareFault(hw.to_string()),
                HwError::I2c(_) | HwError::ShortWrite { .. } => ControlError::Driver(hw.to_string()),
                HwError::Io(_) => ControlError::Io(hw.to_string()),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return ControlError::Io(io.to_string());
    }
    ControlError::Hardware(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_kind() {
        let e = std::io::Error::other("bus gone");
        assert!(matches!(map_hw_error(&e), ControlError::Io(_)));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn short_writes_are_driver_errors() {
        let e = motorloop_hardware::HwError::ShortWrite {
            expected: 4,
            written: 2,
        };
        assert!(matches!(map_hw_error(&e), ControlError::Driver(_)));
    }

    #[test]
    fn unknown_errors_fall_back_to_hardware() {
        let e: motorloop_traits::BoxError = "mystery".into();
        match map_hw_error(&*e) {
            ControlError::Hardware(msg) => assert_eq!(msg, "mystery"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
