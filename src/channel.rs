//! Channel model: one relay output plus an optional wall switch.
//!
//! [`ChannelTable::drive`] is the only code path that writes a relay and
//! the only place `output_state` changes.  Both arbitration paths (the
//! manual arbiter and the queue drain) run inside the same control-loop
//! tick, so the write path is never entered concurrently.

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::app::ports::ActuatorPort;
use crate::config::{bounded, ChannelConfig};
use crate::error::ActuatorError;

/// Stable channel identifier.
pub type ChannelId = u8;

/// Maximum number of channels on one node.
pub const MAX_CHANNELS: usize = 8;

/// Electrical level that means "switch closed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputPolarity {
    ActiveHigh,
    ActiveLow,
}

impl InputPolarity {
    /// Normalise a raw level (`true` = HIGH) to a logical "active" flag.
    pub fn is_active(self, raw_high: bool) -> bool {
        match self {
            Self::ActiveHigh => raw_high,
            Self::ActiveLow => !raw_high,
        }
    }
}

/// Live state of one controllable actuator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: heapless::String<32>,
    /// Mirrors the last accepted transition from either arbiter source.
    pub output_state: bool,
    /// Set by an accepted manual transition, cleared once a remote command
    /// is applied.
    pub manual_override: bool,
    pub input_polarity: InputPolarity,
    pub has_input: bool,
}

impl Channel {
    pub fn from_config(cfg: &ChannelConfig) -> Self {
        Self {
            id: cfg.id,
            name: bounded(cfg.name.as_str()),
            output_state: false,
            manual_override: false,
            input_polarity: cfg.polarity,
            has_input: cfg.input_gpio.is_some(),
        }
    }
}

/// The node-wide channel table.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    channels: heapless::Vec<Channel, MAX_CHANNELS>,
}

impl ChannelTable {
    /// Build the table from config.  Every channel starts OFF.
    pub fn from_config(configs: &[ChannelConfig]) -> Self {
        let mut channels = heapless::Vec::new();
        for cfg in configs.iter().take(MAX_CHANNELS) {
            let _ = channels.push(Channel::from_config(cfg));
        }
        Self { channels }
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Drive a relay and record the new output state.
    ///
    /// Returns the previous output state.  On a failed write the recorded
    /// state is left untouched so it keeps mirroring the hardware.
    pub fn drive(
        &mut self,
        hw: &mut impl ActuatorPort,
        id: ChannelId,
        on: bool,
    ) -> Result<bool, ActuatorError> {
        let channel = self
            .channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(ActuatorError::UnknownChannel)?;
        let previous = channel.output_state;

        if let Err(e) = hw.write_output(id, on) {
            error!("Channel {} ({}): relay write failed: {}", id, channel.name, e);
            return Err(e);
        }

        channel.output_state = on;
        if previous != on {
            info!(
                "Channel {} ({}): {} -> {}",
                id,
                channel.name,
                on_off(previous),
                on_off(on)
            );
        }
        Ok(previous)
    }

    /// Set or clear the manual-override flag.
    pub fn set_manual_override(&mut self, id: ChannelId, value: bool) {
        if let Some(c) = self.channels.iter_mut().find(|c| c.id == id) {
            c.manual_override = value;
        }
    }
}

pub(crate) fn on_off(state: bool) -> &'static str {
    if state { "ON" } else { "OFF" }
}
