//! Debounced wall-switch sampling and the manual arbiter.
//!
//! ```text
//!   InputPort ──▶ polarity ──▶ DebounceState ──▶ Transition
//!                                                   │
//!                       ChannelTable::drive ◀───────┤
//!                       OverrideLog::record ◀───────┘
//! ```
//!
//! A transition is accepted once the normalised level has held for the
//! debounce window and differs from the last accepted level.  Accepted
//! transitions go straight to the relay: they bypass the command queue and
//! ignore link state, quiet window and queue backlog.

use log::{debug, warn};

use crate::app::ports::{ActuatorPort, InputPort};
use crate::channel::{ChannelId, ChannelTable, MAX_CHANNELS};
use crate::error::Error;

/// Per-channel input filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceState {
    /// Last normalised sample.
    pub raw_level: bool,
    /// Level that has held for the full window.
    pub stable_level: bool,
    /// When `raw_level` last changed.
    pub last_change_ms: u32,
    /// Level of the last transition handed to the relay.
    pub last_accepted_active: bool,
}

impl DebounceState {
    /// Seed from the first sample.  The switch position found at boot is
    /// taken as already accepted so it does not override restored state.
    pub fn seeded(active: bool, now_ms: u32) -> Self {
        Self {
            raw_level: active,
            stable_level: active,
            last_change_ms: now_ms,
            last_accepted_active: active,
        }
    }

    /// Feed one normalised sample.  Returns the newly accepted level, if any.
    pub fn update(&mut self, active: bool, now_ms: u32, window_ms: u32) -> Option<bool> {
        if active != self.raw_level {
            self.raw_level = active;
            self.last_change_ms = now_ms;
            return None;
        }
        if now_ms.wrapping_sub(self.last_change_ms) < window_ms {
            return None;
        }
        self.stable_level = active;
        if self.stable_level == self.last_accepted_active {
            return None;
        }
        self.last_accepted_active = self.stable_level;
        Some(self.stable_level)
    }
}

/// An accepted manual edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub channel_id: ChannelId,
    /// New logical state requested by the switch.
    pub active: bool,
    /// Relay state before the transition was applied.
    pub previous: bool,
    pub at_ms: u32,
}

/// Latest accepted manual transition on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualOverrideRecord {
    pub channel_id: ChannelId,
    pub timestamp_ms: u32,
}

/// Most recent manual transition per channel.  Read by the command queue,
/// written only by the arbiter.  A channel keeps a single record that each
/// new transition refreshes, so activity on other switches cannot push it
/// out.
#[derive(Debug, Clone, Default)]
pub struct OverrideLog {
    records: heapless::Vec<ManualOverrideRecord, MAX_CHANNELS>,
}

impl OverrideLog {
    pub fn record(&mut self, channel_id: ChannelId, now_ms: u32) {
        if let Some(r) = self.records.iter_mut().find(|r| r.channel_id == channel_id) {
            r.timestamp_ms = now_ms;
            return;
        }
        let record = ManualOverrideRecord {
            channel_id,
            timestamp_ms: now_ms,
        };
        if let Err(record) = self.records.push(record) {
            // More distinct ids than channels: reuse the oldest slot.
            if let Some(oldest) = self
                .records
                .iter_mut()
                .max_by_key(|r| now_ms.wrapping_sub(r.timestamp_ms))
            {
                *oldest = record;
            }
        }
    }

    /// Drop records older than the priority window.
    pub fn prune(&mut self, now_ms: u32, window_ms: u32) {
        self.records
            .retain(|r| now_ms.wrapping_sub(r.timestamp_ms) < window_ms);
    }

    /// `true` if a manual transition on `channel_id` happened less than
    /// `window_ms` ago.
    pub fn is_within_priority(&self, channel_id: ChannelId, now_ms: u32, window_ms: u32) -> bool {
        self.records.iter().any(|r| {
            r.channel_id == channel_id && now_ms.wrapping_sub(r.timestamp_ms) < window_ms
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Samples every channel with an input and applies accepted transitions.
#[derive(Debug, Default)]
pub struct ManualArbiter {
    states: heapless::Vec<(ChannelId, DebounceState), MAX_CHANNELS>,
    log: OverrideLog,
    debounce_ms: u32,
    priority_ms: u32,
}

impl ManualArbiter {
    pub fn new(debounce_ms: u32, priority_ms: u32) -> Self {
        Self {
            states: heapless::Vec::new(),
            log: OverrideLog::default(),
            debounce_ms,
            priority_ms,
        }
    }

    pub fn override_log(&self) -> &OverrideLog {
        &self.log
    }

    pub fn priority_ms(&self) -> u32 {
        self.priority_ms
    }

    /// `true` while remote commands for `channel_id` must be suppressed.
    pub fn is_within_priority(&self, channel_id: ChannelId, now_ms: u32) -> bool {
        self.log.is_within_priority(channel_id, now_ms, self.priority_ms)
    }

    pub fn debounce_state(&self, channel_id: ChannelId) -> Option<&DebounceState> {
        self.states
            .iter()
            .find(|(id, _)| *id == channel_id)
            .map(|(_, s)| s)
    }

    /// Sample one channel.  Returns the accepted transition, already
    /// applied to hardware, or `None`.
    pub fn sample(
        &mut self,
        channels: &mut ChannelTable,
        io: &mut (impl InputPort + ActuatorPort),
        channel_id: ChannelId,
        now_ms: u32,
    ) -> Result<Option<Transition>, Error> {
        let Some(channel) = channels.get(channel_id) else {
            return Ok(None);
        };
        if !channel.has_input {
            return Ok(None);
        }
        let polarity = channel.input_polarity;
        let active = polarity.is_active(io.read_input(channel_id)?);

        let Some(state) = self
            .states
            .iter_mut()
            .find(|(id, _)| *id == channel_id)
            .map(|(_, s)| s)
        else {
            let _ = self
                .states
                .push((channel_id, DebounceState::seeded(active, now_ms)));
            return Ok(None);
        };
        let Some(active) = state.update(active, now_ms, self.debounce_ms) else {
            return Ok(None);
        };

        debug!("Manual: channel {} switch -> {}", channel_id, active);
        let previous = match channels.drive(io, channel_id, active) {
            Ok(previous) => previous,
            Err(e) => {
                // Not accepted until the relay moves; the next sample retries.
                state.last_accepted_active = !active;
                return Err(e.into());
            }
        };
        channels.set_manual_override(channel_id, true);
        self.log.record(channel_id, now_ms);

        Ok(Some(Transition {
            channel_id,
            active,
            previous,
            at_ms: now_ms,
        }))
    }

    /// Sample every channel once.  Read failures are logged and skipped so
    /// one broken input cannot stall the others.
    pub fn sample_all(
        &mut self,
        channels: &mut ChannelTable,
        io: &mut (impl InputPort + ActuatorPort),
        now_ms: u32,
    ) -> heapless::Vec<Result<Transition, (ChannelId, Error)>, MAX_CHANNELS> {
        self.log.prune(now_ms, self.priority_ms);

        let ids: heapless::Vec<ChannelId, MAX_CHANNELS> = channels
            .iter()
            .filter(|c| c.has_input)
            .map(|c| c.id)
            .collect();

        let mut out = heapless::Vec::new();
        for id in ids {
            match self.sample(channels, io, id, now_ms) {
                Ok(Some(t)) => {
                    let _ = out.push(Ok(t));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Manual: channel {} sample failed: {}", id, e);
                    let _ = out.push(Err((id, e)));
                }
            }
        }
        out
    }
}
