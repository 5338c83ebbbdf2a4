//! Hardware adapter: bridges relay and switch drivers to domain ports.
//!
//! Owns one [`RelayDriver`] per channel and one [`SwitchInput`] per wired
//! wall switch, exposing them through [`ActuatorPort`] and [`InputPort`].
//! This is the only module in the system that touches GPIO.  Pin types are
//! generic so host tests can substitute plain structs for `PinDriver`s.

use embedded_hal::digital::{InputPin, OutputPin};

use crate::app::ports::{ActuatorPort, InputPort};
use crate::channel::{ChannelId, MAX_CHANNELS};
use crate::drivers::manual_input::SwitchInput;
use crate::drivers::relay::RelayDriver;
use crate::error::{ActuatorError, InputError};

/// Concrete adapter that combines all channel I/O behind port traits.
pub struct HardwareAdapter<O: OutputPin, I: InputPin> {
    relays: heapless::Vec<(ChannelId, RelayDriver<O>), MAX_CHANNELS>,
    inputs: heapless::Vec<(ChannelId, SwitchInput<I>), MAX_CHANNELS>,
}

impl<O: OutputPin, I: InputPin> Default for HardwareAdapter<O, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: OutputPin, I: InputPin> HardwareAdapter<O, I> {
    pub fn new() -> Self {
        Self {
            relays: heapless::Vec::new(),
            inputs: heapless::Vec::new(),
        }
    }

    /// Attach a relay.  The pin is driven to the OFF level at once.
    pub fn add_relay(&mut self, id: ChannelId, pin: O, active_low: bool) -> Result<(), ActuatorError> {
        let relay = RelayDriver::new(pin, active_low)?;
        self.relays
            .push((id, relay))
            .map_err(|_| ActuatorError::UnknownChannel)
    }

    /// Attach a wall switch input.
    pub fn add_input(&mut self, id: ChannelId, pin: I) -> Result<(), InputError> {
        self.inputs
            .push((id, SwitchInput::new(pin)))
            .map_err(|_| InputError::GpioReadFailed)
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    pub fn is_energised(&self, id: ChannelId) -> Option<bool> {
        self.relays
            .iter()
            .find(|(cid, _)| *cid == id)
            .map(|(_, r)| r.is_on())
    }
}

// ── ActuatorPort implementation ───────────────────────────────

impl<O: OutputPin, I: InputPin> ActuatorPort for HardwareAdapter<O, I> {
    fn write_output(&mut self, channel: ChannelId, on: bool) -> Result<(), ActuatorError> {
        let (_, relay) = self
            .relays
            .iter_mut()
            .find(|(id, _)| *id == channel)
            .ok_or(ActuatorError::UnknownChannel)?;
        relay.set(on)
    }
}

// ── InputPort implementation ──────────────────────────────────

impl<O: OutputPin, I: InputPin> InputPort for HardwareAdapter<O, I> {
    fn read_input(&mut self, channel: ChannelId) -> Result<bool, InputError> {
        let (_, input) = self
            .inputs
            .iter_mut()
            .find(|(id, _)| *id == channel)
            .ok_or(InputError::GpioReadFailed)?;
        input.is_high()
    }
}
