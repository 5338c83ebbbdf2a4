//! WebSocket link adapter.
//!
//! Implements [`LinkTransport`] for the coordinator connection.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspWebSocketClient` from `esp_idf_svc`.
//!   The client runs its own task and reports through a callback; the
//!   callback only pushes into a bounded `embassy-sync` channel which the
//!   control loop drains on its next tick.
//!
//! ```text
//! ┌──────────────┐ TransportEvent ┌──────────────┐
//! │ WS client    │───────────────▶│ Control loop │
//! │ task (IDF)   │    Inbox (32)  │ poll_event() │
//! └──────────────┘                └──────────────┘
//! ```
//! - **all other targets**: an in-process simulation.  Frames the node
//!   sends are captured, and host code scripts the coordinator side with
//!   [`WsTransport::inject`].
//!
//! Network availability is pushed in by the owner (normally from the WiFi
//! adapter) with [`WsTransport::set_network_available`].

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::{info, warn};

use crate::error::LinkError;
use crate::link::transport::{LinkTransport, TransportEvent};

/// Inbox bound.  Older frames are dropped first when the loop stalls.
const INBOX_CAPACITY: usize = 32;

/// Client task → control loop.  One per transport, shared with the
/// client callback.
type Inbox = Arc<Channel<CriticalSectionRawMutex, TransportEvent, INBOX_CAPACITY>>;

fn push_event(inbox: &Inbox, event: TransportEvent) {
    if let Err(TrySendError::Full(event)) = inbox.try_send(event) {
        let _ = inbox.try_receive();
        warn!("Link: inbox full, oldest frame dropped");
        if inbox.try_send(event).is_err() {
            warn!("Link: inbox still full, frame dropped");
        }
    }
}

pub struct WsTransport {
    url: heapless::String<128>,
    network_up: bool,
    inbox: Inbox,
    #[cfg(target_os = "espidf")]
    client: Option<esp_idf_svc::ws::client::EspWebSocketClient<'static>>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimPeer,
}

/// Host-side stand-in for the coordinator end of the socket.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
struct SimPeer {
    open: bool,
    refuse: bool,
    sent: Vec<String>,
}

impl WsTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: crate::config::bounded(url),
            network_up: false,
            inbox: Arc::new(Channel::new()),
            #[cfg(target_os = "espidf")]
            client: None,
            #[cfg(not(target_os = "espidf"))]
            sim: SimPeer::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_network_available(&mut self, up: bool) {
        if self.network_up && !up {
            info!("Link: network path lost");
        }
        self.network_up = up;
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_open(&mut self) -> Result<(), LinkError> {
        use core::time::Duration;
        use esp_idf_svc::ws::client::{EspWebSocketClient, EspWebSocketClientConfig, WebSocketEventType};

        let inbox = Arc::clone(&self.inbox);
        let config = EspWebSocketClientConfig {
            reconnect_timeout_ms: Duration::ZERO,
            ..Default::default()
        };
        let client = EspWebSocketClient::new(
            self.url.as_str(),
            &config,
            Duration::from_secs(10),
            move |event| {
                let mapped = match event {
                    Ok(ev) => match &ev.event_type {
                        WebSocketEventType::Connected => Some(TransportEvent::Opened),
                        WebSocketEventType::Disconnected | WebSocketEventType::Closed => {
                            Some(TransportEvent::Closed)
                        }
                        WebSocketEventType::Text(text) => Some(TransportEvent::Text(text.to_string())),
                        _ => None,
                    },
                    Err(_) => Some(TransportEvent::Error),
                };
                if let Some(event) = mapped {
                    push_event(&inbox, event);
                }
            },
        )
        .map_err(|e| {
            warn!("Link: websocket client init failed: {}", e);
            LinkError::ConnectFailed
        })?;
        self.client = Some(client);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_open(&mut self) -> Result<(), LinkError> {
        if self.sim.refuse {
            return Err(LinkError::ConnectFailed);
        }
        self.sim.open = true;
        push_event(&self.inbox, TransportEvent::Opened);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_close(&mut self) {
        // Dropping the client stops its task and closes the socket.
        self.client = None;
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_close(&mut self) {
        self.sim.open = false;
    }

    #[cfg(target_os = "espidf")]
    fn platform_send(&mut self, text: &str) -> Result<(), LinkError> {
        use esp_idf_svc::ws::FrameType;

        let client = self.client.as_mut().ok_or(LinkError::NotConnected)?;
        if !client.is_connected() {
            return Err(LinkError::NotConnected);
        }
        client
            .send(FrameType::Text(false), text.as_bytes())
            .map_err(|_| LinkError::SendFailed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_send(&mut self, text: &str) -> Result<(), LinkError> {
        if !self.sim.open {
            return Err(LinkError::NotConnected);
        }
        self.sim.sent.push(text.to_string());
        Ok(())
    }
}

// ── Simulation controls (host only) ───────────────────────────

#[cfg(not(target_os = "espidf"))]
impl WsTransport {
    /// Queue an event as if the coordinator produced it.
    pub fn inject(&mut self, event: TransportEvent) {
        if matches!(event, TransportEvent::Closed) {
            self.sim.open = false;
        }
        push_event(&self.inbox, event);
    }

    /// Make subsequent `open` calls fail.
    pub fn refuse_connections(&mut self, refuse: bool) {
        self.sim.refuse = refuse;
    }

    /// Frames sent since the last call.
    pub fn take_sent(&mut self) -> Vec<String> {
        core::mem::take(&mut self.sim.sent)
    }
}

// ── LinkTransport implementation ──────────────────────────────

impl LinkTransport for WsTransport {
    fn network_available(&self) -> bool {
        self.network_up && !self.url.is_empty()
    }

    fn open(&mut self) -> Result<(), LinkError> {
        if !self.network_available() {
            return Err(LinkError::NetworkDown);
        }
        self.platform_close();
        info!("Link: opening {}", self.url);
        self.platform_open()
    }

    fn close(&mut self) {
        self.platform_close();
        self.inbox.clear();
    }

    fn send(&mut self, text: &str) -> Result<(), LinkError> {
        self.platform_send(text)
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.inbox.try_receive().ok()
    }
}
