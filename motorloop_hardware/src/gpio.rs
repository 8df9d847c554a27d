//! Encoder edge source on Raspberry Pi GPIO lines (both-edge interrupts).
use std::time::Duration;

use motorloop_traits::{BoxError, Channel, EdgeEvent, EdgeSource, Ready};
use rppal::gpio::{Gpio, InputPin, Level, Trigger};

use crate::error::{HwError, Result};

pub struct GpioEdgeSource {
    gpio: Gpio,
    a: InputPin,
    b: InputPin,
    // One buffered event per line; the next poll fetches more.
    pending_a: Option<EdgeEvent>,
    pending_b: Option<EdgeEvent>,
}

impl GpioEdgeSource {
    /// Claim both lines as inputs with edge interrupts. Lines are released
    /// when the source is dropped, including on a failed construction.
    pub fn open(a_line: u8, b_line: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(format!("open gpio: {e}")))?;
        let mut a = gpio
            .get(a_line)
            .map_err(|e| HwError::Gpio(format!("open encoder line {a_line}: {e}")))?
            .into_input();
        let mut b = gpio
            .get(b_line)
            .map_err(|e| HwError::Gpio(format!("open encoder line {b_line}: {e}")))?
            .into_input();
        a.set_interrupt(Trigger::Both, None)
            .map_err(|e| HwError::Gpio(format!("edge request on line {a_line}: {e}")))?;
        b.set_interrupt(Trigger::Both, None)
            .map_err(|e| HwError::Gpio(format!("edge request on line {b_line}: {e}")))?;
        tracing::debug!(a_line, b_line, "encoder lines claimed");
        Ok(Self {
            gpio,
            a,
            b,
            pending_a: None,
            pending_b: None,
        })
    }

    fn buffered(&self) -> Ready {
        Ready {
            a: self.pending_a.is_some(),
            b: self.pending_b.is_some(),
        }
    }
}

impl EdgeSource for GpioEdgeSource {
    fn level(&mut self, channel: Channel) -> std::result::Result<bool, BoxError> {
        let pin = match channel {
            Channel::A => &self.a,
            Channel::B => &self.b,
        };
        Ok(pin.read() == Level::High)
    }

    fn wait(&mut self, timeout: Duration) -> std::result::Result<Ready, BoxError> {
        let ready = self.buffered();
        if ready.any() {
            return Ok(ready);
        }
        let hit = self
            .gpio
            .poll_interrupts(&[&self.a, &self.b], false, Some(timeout))
            .map_err(|e| HwError::Gpio(format!("poll encoder lines: {e}")))?
            .map(|(pin, event)| (pin.pin(), event));
        if let Some((line, event)) = hit {
            let ev = EdgeEvent {
                timestamp_us: event.timestamp.as_micros().min(u128::from(u64::MAX)) as u64,
            };
            if line == self.a.pin() {
                self.pending_a = Some(ev);
            } else {
                self.pending_b = Some(ev);
            }
        }
        Ok(self.buffered())
    }

    fn read_edge(&mut self, channel: Channel) -> std::result::Result<Option<EdgeEvent>, BoxError> {
        Ok(match channel {
            Channel::A => self.pending_a.take(),
            Channel::B => self.pending_b.take(),
        })
    }
}
