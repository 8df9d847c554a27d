//! Pololu Motoron command encoding and the I2C-backed driver.
//!
//! The byte builders are plain functions so they can be checked without a bus.
use motorloop_traits::clamp_speed;

pub const CMD_SET_PROTOCOL_OPTIONS: u8 = 0x8B;
pub const CMD_CLEAR_LATCHED_STATUS_FLAGS: u8 = 0xA9;
pub const CMD_SET_SPEED_NOW: u8 = 0xD2;
pub const CMD_SET_ALL_SPEEDS_NOW: u8 = 0xE2;

/// Protocol options byte with CRC for commands and responses turned off.
const PROTOCOL_OPTIONS_NO_CRC: u8 = 0x04;
/// Status flag bit 9 ("reset"), split into two 7-bit halves.
const RESET_FLAG_LO: u8 = 0x00;
const RESET_FLAG_HI: u8 = 0x04;

/// Disable CRC so plain writes are accepted.
pub fn disable_crc() -> [u8; 2] {
    [CMD_SET_PROTOCOL_OPTIONS, PROTOCOL_OPTIONS_NO_CRC]
}

/// Clear the latched reset flag; the controller refuses to drive while it is set.
pub fn clear_reset_flag() -> [u8; 3] {
    [CMD_CLEAR_LATCHED_STATUS_FLAGS, RESET_FLAG_LO, RESET_FLAG_HI]
}

/// Immediate speed command for one motor; speed is clamped to ±800 and sent
/// as a 14-bit two's-complement value in two 7-bit bytes.
pub fn set_speed_now(motor: u8, speed: i16) -> [u8; 4] {
    let s = clamp_speed(speed);
    [
        CMD_SET_SPEED_NOW,
        motor & 0x7F,
        (s & 0x7F) as u8,
        ((s >> 7) & 0x7F) as u8,
    ]
}

/// Zero every channel at once.
pub fn coast_all_now() -> [u8; 8] {
    let mut cmd = [0u8; 8];
    cmd[0] = CMD_SET_ALL_SPEEDS_NOW;
    cmd
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use driver::Motoron;

#[cfg(all(feature = "hardware", target_os = "linux"))]
mod driver {
    use motorloop_traits::{ActuatorDriver, BoxError};
    use rppal::i2c::I2c;

    use crate::error::{HwError, Result};

    pub struct Motoron {
        i2c: I2c,
        address: u16,
        enabled: bool,
    }

    impl Motoron {
        /// Open `/dev/i2c-<bus>` and target the controller at `address`.
        pub fn open(bus: u8, address: u16) -> Result<Self> {
            let mut i2c =
                I2c::with_bus(bus).map_err(|e| HwError::I2c(format!("open i2c-{bus}: {e}")))?;
            i2c.set_slave_address(address)
                .map_err(|e| HwError::I2c(format!("select 0x{address:02x}: {e}")))?;
            Ok(Self {
                i2c,
                address,
                enabled: false,
            })
        }

        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            let written = self
                .i2c
                .write(bytes)
                .map_err(|e| HwError::I2c(format!("write to 0x{:02x}: {e}", self.address)))?;
            if written != bytes.len() {
                return Err(HwError::ShortWrite {
                    expected: bytes.len(),
                    written,
                });
            }
            Ok(())
        }
    }

    impl ActuatorDriver for Motoron {
        fn init(&mut self) -> std::result::Result<(), BoxError> {
            self.write(&super::disable_crc())?;
            self.write(&super::clear_reset_flag())?;
            self.enabled = true;
            tracing::info!(address = self.address, "motoron initialised");
            Ok(())
        }

        fn set_speed(&mut self, channel: u8, speed: i16) -> std::result::Result<(), BoxError> {
            if !self.enabled {
                return Ok(());
            }
            self.write(&super::set_speed_now(channel, speed))?;
            Ok(())
        }

        fn coast_all(&mut self) -> std::result::Result<(), BoxError> {
            self.write(&super::coast_all_now())?;
            Ok(())
        }

        fn enable(&mut self, on: bool) -> std::result::Result<(), BoxError> {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, [0x00, 0x00])]
    #[case(800, [0x20, 0x06])]
    #[case(-800, [0x60, 0x79])]
    #[case(1_000, [0x20, 0x06])]
    #[case(-1, [0x7F, 0x7F])]
    fn set_speed_encodes_14_bit_twos_complement(#[case] speed: i16, #[case] tail: [u8; 2]) {
        let cmd = set_speed_now(2, speed);
        assert_eq!(cmd[0], CMD_SET_SPEED_NOW);
        assert_eq!(cmd[1], 2);
        assert_eq!([cmd[2], cmd[3]], tail);
    }

    #[test]
    fn coast_all_is_all_speeds_zero() {
        let cmd = coast_all_now();
        assert_eq!(cmd[0], CMD_SET_ALL_SPEEDS_NOW);
        assert!(cmd[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn init_sequence_bytes() {
        assert_eq!(disable_crc(), [0x8B, 0x04]);
        assert_eq!(clear_reset_flag(), [0xA9, 0x00, 0x04]);
    }
}
