//! Control directives from the coordinator.
//!
//! Each one is acknowledged with a matching `*_ack` frame by the
//! [`NodeService`](super::service::NodeService).

/// Node-level requests that are not addressed to a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Snapshot, acknowledge, then reboot at the end of the tick.
    Restart,

    /// Erase the stored snapshot.  Live relay states are untouched.
    ClearStates,

    /// Write a snapshot now instead of waiting for the cadence.
    SaveStates,

    /// Reply with the full channel state.
    GetStates,
}

impl Directive {
    pub fn name(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::ClearStates => "clear_states",
            Self::SaveStates => "save_states",
            Self::GetStates => "get_states",
        }
    }
}
