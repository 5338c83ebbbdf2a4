//! Relay coil driver.
//!
//! Generic over any `embedded-hal` 1.0 [`OutputPin`], so the same driver
//! runs on an ESP-IDF `PinDriver` and on a host test pin.  Most relay
//! modules sold for the ESP32 energise on a LOW input; `active_low` hides
//! that from everything above this driver.

use embedded_hal::digital::OutputPin;
use log::error;

use crate::error::ActuatorError;

pub struct RelayDriver<P: OutputPin> {
    pin: P,
    active_low: bool,
    energised: bool,
}

impl<P: OutputPin> RelayDriver<P> {
    /// Take the pin and drive it to the de-energised level immediately.
    pub fn new(pin: P, active_low: bool) -> Result<Self, ActuatorError> {
        let mut relay = Self {
            pin,
            active_low,
            energised: false,
        };
        relay.set(false)?;
        Ok(relay)
    }

    pub fn set(&mut self, on: bool) -> Result<(), ActuatorError> {
        let high = on != self.active_low;
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if result.is_err() {
            error!("Relay: GPIO write failed");
            return Err(ActuatorError::GpioWriteFailed);
        }
        self.energised = on;
        Ok(())
    }

    pub fn is_on(&self) -> bool {
        self.energised
    }
}
