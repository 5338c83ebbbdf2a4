//! Outbound application events.
//!
//! The [`NodeService`](super::service::NodeService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  An external logging
//! service persists and indexes them; the core never waits on delivery.

use crate::channel::ChannelId;
use crate::error::{Error, Severity};
use crate::link::LinkState;

/// What changed a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySource {
    Remote,
    Deferred,
    Restore,
}

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// A relay was driven by something other than a wall switch.
    Activity {
        channel_id: ChannelId,
        state: bool,
        source: ActivitySource,
    },

    /// A wall switch was accepted.  `reported` is `false` when the link was
    /// down and the coordinator never heard of it.
    ManualSwitch {
        channel_id: ChannelId,
        previous: bool,
        state: bool,
        reported: bool,
    },

    /// Something went wrong.  The node keeps running.
    Error { severity: Severity, error: Error },

    /// Stale or overflowing data was dropped.
    Discarded {
        severity: Severity,
        what: &'static str,
    },

    /// The link changed state.
    DeviceStatus { link: LinkState, uptime_secs: u64 },

    /// The service has started.  Carries the number of channels restored
    /// from the snapshot.
    Started { restored_channels: usize },
}

impl AppEvent {
    pub fn error(error: Error) -> Self {
        Self::Error {
            severity: error.severity(),
            error,
        }
    }
}
