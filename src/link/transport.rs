//! Transport seam between the link state machine and the network stack.
//!
//! The transport never calls back into the node.  Whatever happened since
//! the last tick is queued inside the adapter and handed over one event at
//! a time through [`LinkTransport::poll_event`].

use crate::error::LinkError;

/// Something the transport observed since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Closed,
    Text(String),
    Error,
}

/// Non-blocking message transport to the coordinator.
pub trait LinkTransport {
    /// Whether a network path exists at all (e.g. WiFi associated).
    fn network_available(&self) -> bool;

    /// Start opening a connection.  Completion is reported later as
    /// [`TransportEvent::Opened`].
    fn open(&mut self) -> Result<(), LinkError>;

    /// Tear the connection down.  Idempotent.
    fn close(&mut self);

    /// Send one text frame.
    fn send(&mut self, text: &str) -> Result<(), LinkError>;

    /// Next pending event, if any.
    fn poll_event(&mut self) -> Option<TransportEvent>;
}

/// Transport for a node running without a coordinator.
#[derive(Debug, Default)]
pub struct NullTransport;

impl LinkTransport for NullTransport {
    fn network_available(&self) -> bool {
        false
    }

    fn open(&mut self) -> Result<(), LinkError> {
        Err(LinkError::NetworkDown)
    }

    fn close(&mut self) {}

    fn send(&mut self, _text: &str) -> Result<(), LinkError> {
        Err(LinkError::NotConnected)
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        None
    }
}
