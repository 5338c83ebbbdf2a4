//! Crash-safe channel state snapshots.
//!
//! One snapshot lives in the store, overwritten in place.  It is written
//! on a fixed cadence and right before a planned restart, and read once at
//! boot.  Store failures never stop the node: they are logged and the
//! node carries on with in-memory state only.
//!
//! Snapshots carry the clock they were stamped with.  Wall-clock time only
//! exists after SNTP sync, so a snapshot stamped in epoch seconds cannot be
//! aged against a freshly booted node's uptime; the caller is told to wait
//! for the wall clock instead.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ActuatorPort, ClockPort, StoragePort, StorageError};
use crate::channel::{ChannelId, ChannelTable, MAX_CHANNELS};

const NAMESPACE: &str = "relaynode";
const SNAPSHOT_KEY: &str = "snapshot";
const SNAPSHOT_VERSION: u8 = 2;
/// Upper bound on the encoded snapshot size.
const SNAPSHOT_BUF: usize = 128;

/// Seconds on one of the node's two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timestamp {
    /// Wall clock, seconds since the Unix epoch.
    Epoch(u64),
    /// Seconds since boot.  Meaningless across a restart.
    Uptime(u64),
}

impl Timestamp {
    pub fn now(clock: &impl ClockPort) -> Self {
        match clock.epoch_secs() {
            Some(secs) => Self::Epoch(secs),
            None => Self::Uptime(clock.uptime_secs()),
        }
    }

    pub fn secs(self) -> u64 {
        match self {
            Self::Epoch(s) | Self::Uptime(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChannel {
    pub id: ChannelId,
    pub output_state: bool,
    pub manual_override: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub version: u8,
    pub saved_at: Timestamp,
    pub channels: heapless::Vec<PersistedChannel, MAX_CHANNELS>,
}

impl PersistedSnapshot {
    pub fn capture(channels: &ChannelTable, saved_at: Timestamp) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            channels: channels
                .iter()
                .map(|c| PersistedChannel {
                    id: c.id,
                    output_state: c.output_state,
                    manual_override: c.manual_override,
                })
                .collect(),
        }
    }

    /// `true` when the snapshot carries wall time and `now` does not: its
    /// age is unknown until the clock syncs.
    pub fn awaits_wall_clock(&self, now: Timestamp) -> bool {
        matches!((self.saved_at, now), (Timestamp::Epoch(_), Timestamp::Uptime(_)))
    }

    /// Drive every stored channel that still exists.  Returns the number
    /// of channels applied.
    pub fn apply(&self, channels: &mut ChannelTable, hw: &mut impl ActuatorPort) -> usize {
        let mut applied = 0;
        for stored in &self.channels {
            if !channels.contains(stored.id) {
                warn!("Persist: snapshot channel {} no longer configured", stored.id);
                continue;
            }
            match channels.drive(hw, stored.id, stored.output_state) {
                Ok(_) => {
                    channels.set_manual_override(stored.id, stored.manual_override);
                    applied += 1;
                }
                Err(e) => error!("Persist: restore of channel {} failed: {}", stored.id, e),
            }
        }
        applied
    }
}

/// Why a stored snapshot was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Absent,
    Stale { age_secs: u64 },
    Unreadable(StorageError),
}

pub struct PersistenceManager {
    max_age_secs: u64,
}

impl PersistenceManager {
    pub fn new(max_age_secs: u32) -> Self {
        Self {
            max_age_secs: u64::from(max_age_secs),
        }
    }

    /// Write the current channel states.
    pub fn snapshot(
        &self,
        store: &mut impl StoragePort,
        channels: &ChannelTable,
        now: Timestamp,
    ) -> Result<(), StorageError> {
        let snap = PersistedSnapshot::capture(channels, now);
        let mut buf = [0u8; SNAPSHOT_BUF];
        let bytes = postcard::to_slice(&snap, &mut buf).map_err(|_| StorageError::Full)?;
        store.write(NAMESPACE, SNAPSHOT_KEY, bytes).inspect_err(|e| {
            error!("Persist: snapshot write failed: {}", e);
        })?;
        info!(
            "Persist: snapshot saved ({} channels, t={:?})",
            snap.channels.len(),
            now
        );
        Ok(())
    }

    /// Read the stored snapshot and apply the age rule.
    ///
    /// A snapshot that [awaits the wall clock](PersistedSnapshot::awaits_wall_clock)
    /// is returned unchecked; the caller runs [`check_age`](Self::check_age)
    /// once the clock is synced.
    pub fn restore(
        &self,
        store: &impl StoragePort,
        now: Timestamp,
    ) -> Result<PersistedSnapshot, RestoreOutcome> {
        if !store.exists(NAMESPACE, SNAPSHOT_KEY) {
            info!("Persist: no snapshot, using defaults");
            return Err(RestoreOutcome::Absent);
        }
        let mut buf = [0u8; SNAPSHOT_BUF];
        let len = store
            .read(NAMESPACE, SNAPSHOT_KEY, &mut buf)
            .map_err(RestoreOutcome::Unreadable)?;
        let snap: PersistedSnapshot = postcard::from_bytes(&buf[..len]).map_err(|_| {
            warn!("Persist: snapshot undecodable, ignoring");
            RestoreOutcome::Unreadable(StorageError::Corrupted)
        })?;
        if snap.version != SNAPSHOT_VERSION {
            warn!("Persist: snapshot version {} unsupported", snap.version);
            return Err(RestoreOutcome::Unreadable(StorageError::Corrupted));
        }

        if snap.awaits_wall_clock(now) {
            info!("Persist: snapshot age unknown until the wall clock syncs");
            return Ok(snap);
        }
        self.check_age(&snap, now)?;
        info!("Persist: snapshot from t={:?} accepted", snap.saved_at);
        Ok(snap)
    }

    /// The age rule.  Only two epoch stamps can be compared; an uptime
    /// stamp from a previous boot is trusted, as is a snapshot stamped
    /// ahead of `now` (clock stepped backwards).
    pub fn check_age(&self, snap: &PersistedSnapshot, now: Timestamp) -> Result<(), RestoreOutcome> {
        let (Timestamp::Epoch(saved), Timestamp::Epoch(now)) = (snap.saved_at, now) else {
            return Ok(());
        };
        let Some(age_secs) = now.checked_sub(saved) else {
            return Ok(());
        };
        if age_secs >= self.max_age_secs {
            warn!(
                "Persist: snapshot is {} h old, discarding",
                age_secs / 3_600
            );
            return Err(RestoreOutcome::Stale { age_secs });
        }
        Ok(())
    }

    /// Erase the stored snapshot.
    pub fn clear(&self, store: &mut impl StoragePort) -> Result<(), StorageError> {
        store.delete(NAMESPACE, SNAPSHOT_KEY)?;
        info!("Persist: snapshot cleared");
        Ok(())
    }
}
