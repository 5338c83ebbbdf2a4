//! Wall switch sense input.
//!
//! Reports the raw electrical level only.  Polarity and debouncing are
//! handled by the arbiter so they stay testable without hardware.

use embedded_hal::digital::InputPin;

use crate::error::InputError;

pub struct SwitchInput<P: InputPin> {
    pin: P,
}

impl<P: InputPin> SwitchInput<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    /// `true` when the pin reads HIGH.
    pub fn is_high(&mut self) -> Result<bool, InputError> {
        self.pin.is_high().map_err(|_| InputError::GpioReadFailed)
    }
}
