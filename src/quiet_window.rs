//! Quiet-window deferral of remote ON requests.
//!
//! Inside the quiet window an ON request is parked as a
//! [`PendingDeferredCommand`] instead of being queued.  OFF requests are
//! never held back.  Once the local hour leaves the window every parked
//! entry runs exactly once, unless it has gone stale.

use log::{info, warn};

use crate::channel::{ChannelId, MAX_CHANNELS};

/// Time-of-day window.  `start_hour == end_hour` means the window is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    /// Start hour (0-23 inclusive).  E.g. 22 = 10 PM.
    pub start_hour: u8,
    /// End hour (0-23 exclusive).  E.g. 6 = 6 AM.
    pub end_hour: u8,
}

impl QuietHours {
    /// Check if the given hour is within quiet hours.
    pub fn is_quiet(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Wraps around midnight (e.g. 22..6).
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    /// Quiet check for an optional hour.  An unsynced clock counts as
    /// outside the window.
    pub fn is_quiet_at(&self, hour: Option<u8>) -> bool {
        hour.is_some_and(|h| self.is_quiet(h))
    }

    /// Decide whether a request may run now.
    pub fn admit(&self, requested_state: bool, hour: Option<u8>) -> Admission {
        if requested_state && self.is_quiet_at(hour) {
            Admission::Defer
        } else {
            Admission::Admit
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Defer,
}

/// A parked request.  At most one per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDeferredCommand {
    pub channel_id: ChannelId,
    pub requested_state: bool,
    pub created_at_ms: u32,
}

/// Parked requests keyed by channel.
#[derive(Debug, Clone, Default)]
pub struct DeferredCommands {
    entries: heapless::Vec<PendingDeferredCommand, MAX_CHANNELS>,
}

impl DeferredCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a request.  A newer request for the same channel replaces the
    /// older one.  Returns `false` only if the table is full of other
    /// channels.
    pub fn defer(&mut self, channel_id: ChannelId, requested_state: bool, now_ms: u32) -> bool {
        let entry = PendingDeferredCommand {
            channel_id,
            requested_state,
            created_at_ms: now_ms,
        };
        if let Some(existing) = self.entries.iter_mut().find(|e| e.channel_id == channel_id) {
            info!("Quiet: channel {} deferred request superseded", channel_id);
            *existing = entry;
            return true;
        }
        info!("Quiet: channel {} ON deferred until window ends", channel_id);
        self.entries.push(entry).is_ok()
    }

    /// Drop a parked request, e.g. when a later OFF supersedes it.
    pub fn cancel(&mut self, channel_id: ChannelId) -> Option<PendingDeferredCommand> {
        let idx = self.entries.iter().position(|e| e.channel_id == channel_id)?;
        Some(self.entries.swap_remove(idx))
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<&PendingDeferredCommand> {
        self.entries.iter().find(|e| e.channel_id == channel_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry that should run now.
    ///
    /// Nothing is released while `quiet.is_quiet_at(hour)` holds.  Entries
    /// older than `staleness_ms` are discarded without running.  Ages use
    /// `wrapping_sub`, so a monotonic counter rollover is harmless.
    pub fn take_due(
        &mut self,
        quiet: &QuietHours,
        hour: Option<u8>,
        now_ms: u32,
        staleness_ms: u32,
    ) -> Release {
        let mut release = Release::default();
        if self.entries.is_empty() || quiet.is_quiet_at(hour) {
            return release;
        }
        for entry in &self.entries {
            let age = now_ms.wrapping_sub(entry.created_at_ms);
            if age > staleness_ms {
                warn!(
                    "Quiet: channel {} deferred request stale ({} s), discarded",
                    entry.channel_id,
                    age / 1_000
                );
                release.stale += 1;
                continue;
            }
            let _ = release.due.push(*entry);
        }
        self.entries.clear();
        release
    }
}

/// Outcome of [`DeferredCommands::take_due`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Release {
    /// Entries to execute now.
    pub due: heapless::Vec<PendingDeferredCommand, MAX_CHANNELS>,
    /// Entries dropped for age.
    pub stale: usize,
}
