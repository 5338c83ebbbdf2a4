//! Port traits: the seam between the control logic and the board.
//!
//! ```text
//!   relays, switches, clock, NVS ──▶ port traits ──▶ NodeService
//! ```
//!
//! [`NodeService`](super::service::NodeService) takes every collaborator
//! as a generic bound on these traits, so host tests swap in recording
//! doubles.  The coordinator transport is a port too, but it sits next to
//! the link code as [`LinkTransport`](crate::link::transport::LinkTransport).

use crate::channel::ChannelId;
use crate::config::NodeConfig;
use crate::error::{ActuatorError, InputError};

// ── Relays ────────────────────────────────────────────────────

/// `on` means energised; coil polarity is resolved by the adapter.
pub trait ActuatorPort {
    fn write_output(&mut self, channel: ChannelId, on: bool) -> Result<(), ActuatorError>;
}

// ── Wall switches ─────────────────────────────────────────────

/// Raw pin level of a channel's wall switch, `true` for HIGH.  The
/// debouncer applies the channel polarity.
pub trait InputPort {
    fn read_input(&mut self, channel: ChannelId) -> Result<bool, InputError>;
}

// ── Time ──────────────────────────────────────────────────────

pub trait ClockPort {
    /// Monotonic milliseconds since boot.  Wraps at `u32::MAX`; every
    /// consumer compares with `wrapping_sub`.
    fn now_ms(&self) -> u32;

    /// Seconds since boot.
    fn uptime_secs(&self) -> u64;

    /// Local hour-of-day (0–23), or `None` before the wall clock is synced.
    fn current_hour(&self) -> Option<u8>;

    /// Wall-clock seconds since the Unix epoch, or `None` before sync.
    fn epoch_secs(&self) -> Option<u64>;

    /// Timestamp stamped on outbound messages and snapshots: wall clock
    /// when synced, uptime otherwise.
    fn timestamp_secs(&self) -> u64 {
        self.epoch_secs().unwrap_or_else(|| self.uptime_secs())
    }
}

// ── Events ────────────────────────────────────────────────────

/// Receives every [`AppEvent`](super::events::AppEvent).  Must not block.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ── Persistent configuration ──────────────────────────────────

/// Where the node keeps its [`NodeConfig`].
///
/// `save` runs [`NodeConfig::validate`] first and refuses out-of-range
/// values with [`ConfigError::ValidationFailed`]; nothing is clamped.
/// `load` falls back to factory defaults when nothing is stored.
pub trait ConfigPort {
    fn load(&self) -> Result<NodeConfig, ConfigError>;
    fn save(&self, config: &NodeConfig) -> Result<(), ConfigError>;
}

// ── Blob storage ──────────────────────────────────────────────

/// Namespaced blob store backing the channel snapshot.
///
/// A `write` either lands completely or leaves the old blob in place.
pub trait StoragePort {
    /// Copies the blob into `buf` and returns its length.  A blob larger
    /// than `buf` is [`StorageError::Corrupted`].
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Missing keys are not an error.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The stored blob does not decode.
    Corrupted,
    /// Names the offending field.
    ValidationFailed(&'static str),
    IoError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Full,
    IoError,
    Corrupted,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => f.write_str("stored config does not decode"),
            Self::ValidationFailed(field) => write!(f, "invalid config: {}", field),
            Self::IoError => f.write_str("config storage unavailable"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::NotFound => "no such key",
            Self::Full => "partition full",
            Self::IoError => "flash access failed",
            Self::Corrupted => "blob unreadable",
        })
    }
}
