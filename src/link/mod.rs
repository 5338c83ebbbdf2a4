//! Coordinator link: connection lifecycle and handshake.
//!
//! ```text
//!                 open ok            identified
//!  Disconnected ──────────▶ Connecting ─────────▶ Identified
//!       ▲                      │                      │
//!       └──────────────────────┴──────────────────────┘
//!          close / error / no inbound frame for link_timeout
//!          (next attempt after exponential backoff)
//! ```
//!
//! The state machine never calls back into the node.  [`LinkStateMachine::poll`]
//! drains transport events and turns them into [`LinkEvent`]s that the
//! service dispatches within the same tick.
//!
//! Channel configuration arriving from the coordinator (the `switches`
//! list in `identified`, any `config_update`) is surfaced as metadata only.
//! Edge-held state stays authoritative.

pub mod messages;
pub mod signing;
pub mod transport;

use log::{debug, info, warn};

use crate::app::commands::Directive;
use crate::channel::ChannelId;
use crate::config::{Label, NodeConfig};
use crate::error::LinkError;
use crate::scheduler::{elapsed, reached};

use messages::{ConfigMetadata, Inbound, Outbound, Signature, SwitchState};
use transport::{LinkTransport, TransportEvent};

/// Upper bound on transport events handled in one tick.
pub const MAX_EVENTS_PER_POLL: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Identified,
}

/// Per-connection bookkeeping.  Replaced wholesale on every disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSession {
    pub state: LinkState,
    pub transport_open: bool,
    pub connect_started_at: u32,
    pub last_heartbeat_sent_at: Option<u32>,
    pub last_identify_attempt_at: Option<u32>,
    pub last_inbound_at: u32,
}

impl LinkSession {
    fn disconnected(now_ms: u32) -> Self {
        Self {
            state: LinkState::Disconnected,
            transport_open: false,
            connect_started_at: now_ms,
            last_heartbeat_sent_at: None,
            last_identify_attempt_at: None,
            last_inbound_at: now_ms,
        }
    }
}

/// Reconnect delay: doubles with a little jitter, capped, never gives up.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial_ms: u32,
    max_ms: u32,
    current_ms: u32,
    rng: u32,
}

/// Jitter added on each doubling is drawn from `0..MAX_JITTER_MS`.
const MAX_JITTER_MS: u32 = 500;

impl Backoff {
    pub fn new(initial_ms: u32, max_ms: u32, seed: u32) -> Self {
        Self {
            initial_ms,
            max_ms,
            current_ms: initial_ms,
            // xorshift must not start at zero.
            rng: seed | 1,
        }
    }

    /// Delay before the next attempt.  Advances the backoff.
    pub fn next_delay(&mut self) -> u32 {
        let delay = self.current_ms;
        self.current_ms = self
            .current_ms
            .saturating_mul(2)
            .saturating_add(self.jitter())
            .min(self.max_ms);
        delay
    }

    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }

    fn jitter(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x % MAX_JITTER_MS
    }
}

/// Domain-level outcome of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake complete.  The service must broadcast full state before
    /// acting on anything else.
    Identified { advisory_switches: usize },
    Command {
        channel_id: ChannelId,
        requested_state: bool,
    },
    /// Accepted as metadata, never applied to channels.
    ConfigUpdate(ConfigMetadata),
    Directive(Directive),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkTiming {
    identify_retry_ms: u32,
    heartbeat_interval_ms: u32,
    link_timeout_ms: u32,
}

pub struct LinkStateMachine {
    session: LinkSession,
    backoff: Backoff,
    next_attempt_at: u32,
    /// Outbound sequence number.  Outlives sessions so it is strictly
    /// increasing for the whole boot.
    seq: u32,
    timing: LinkTiming,
    node_id: Label,
    secret: heapless::String<64>,
    sign_messages: bool,
}

impl LinkStateMachine {
    pub fn new(cfg: &NodeConfig, node_id: &str, now_ms: u32) -> Self {
        let seed = node_id
            .bytes()
            .fold(0x811c_9dc5_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
        Self {
            session: LinkSession::disconnected(now_ms),
            backoff: Backoff::new(cfg.backoff_initial_ms, cfg.backoff_max_ms, seed),
            next_attempt_at: now_ms,
            seq: 0,
            timing: LinkTiming {
                identify_retry_ms: cfg.identify_retry_ms,
                heartbeat_interval_ms: cfg.heartbeat_interval_ms,
                link_timeout_ms: cfg.link_timeout_ms,
            },
            node_id: crate::config::bounded(node_id),
            secret: cfg.secret.clone(),
            sign_messages: cfg.sign_messages,
        }
    }

    pub fn state(&self) -> LinkState {
        self.session.state
    }

    pub fn is_identified(&self) -> bool {
        self.session.state == LinkState::Identified
    }

    pub fn session(&self) -> &LinkSession {
        &self.session
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Last sequence number handed out.
    pub fn sequence(&self) -> u32 {
        self.seq
    }

    pub fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Time-driven transitions: connect attempts, identify retries,
    /// liveness timeout.
    pub fn maintain(&mut self, transport: &mut impl LinkTransport, now_ms: u32) -> Option<LinkEvent> {
        match self.session.state {
            LinkState::Disconnected => {
                if !transport.network_available() || !reached(now_ms, self.next_attempt_at) {
                    return None;
                }
                match transport.open() {
                    Ok(()) => {
                        info!("Link: connecting");
                        self.session.state = LinkState::Connecting;
                        self.session.connect_started_at = now_ms;
                        self.session.last_inbound_at = now_ms;
                    }
                    Err(e) => {
                        let delay = self.backoff.next_delay();
                        warn!("Link: open failed ({}), retry in {} ms", e, delay);
                        self.next_attempt_at = now_ms.wrapping_add(delay);
                    }
                }
                None
            }
            LinkState::Connecting => {
                if !transport.network_available() {
                    return self.drop_link(transport, now_ms, "network lost");
                }
                if !self.session.transport_open {
                    if elapsed(now_ms, self.session.connect_started_at) >= self.timing.link_timeout_ms {
                        return self.drop_link(transport, now_ms, "connect timeout");
                    }
                    return None;
                }
                let retry_due = self.session.last_identify_attempt_at.is_none_or(|t| {
                    elapsed(now_ms, t) >= self.timing.identify_retry_ms
                });
                if retry_due {
                    if self.session.last_identify_attempt_at.is_some() {
                        debug!("Link: no identified reply, resending identify");
                    }
                    self.send_identify(transport, now_ms);
                }
                if elapsed(now_ms, self.session.last_inbound_at) >= self.timing.link_timeout_ms {
                    return self.drop_link(transport, now_ms, "handshake timeout");
                }
                None
            }
            LinkState::Identified => {
                if !transport.network_available() {
                    return self.drop_link(transport, now_ms, "network lost");
                }
                if elapsed(now_ms, self.session.last_inbound_at) >= self.timing.link_timeout_ms {
                    return self.drop_link(transport, now_ms, "coordinator silent");
                }
                None
            }
        }
    }

    /// Drain pending transport events.
    pub fn poll(
        &mut self,
        transport: &mut impl LinkTransport,
        now_ms: u32,
    ) -> heapless::Vec<LinkEvent, MAX_EVENTS_PER_POLL> {
        let mut out = heapless::Vec::new();
        while !out.is_full() {
            let Some(event) = transport.poll_event() else {
                break;
            };
            if let Some(e) = self.on_transport_event(event, transport, now_ms) {
                let _ = out.push(e);
            }
        }
        out
    }

    fn on_transport_event(
        &mut self,
        event: TransportEvent,
        transport: &mut impl LinkTransport,
        now_ms: u32,
    ) -> Option<LinkEvent> {
        match event {
            TransportEvent::Opened => {
                if self.session.state != LinkState::Connecting {
                    debug!("Link: stray open event ignored");
                    return None;
                }
                info!("Link: transport open, identifying");
                self.session.transport_open = true;
                self.session.last_inbound_at = now_ms;
                self.send_identify(transport, now_ms);
                None
            }
            TransportEvent::Closed => self.drop_link(transport, now_ms, "closed by peer"),
            TransportEvent::Error => self.drop_link(transport, now_ms, "transport error"),
            TransportEvent::Text(text) => {
                if self.session.state == LinkState::Disconnected {
                    return None;
                }
                self.session.last_inbound_at = now_ms;
                match Inbound::decode(&text) {
                    Ok(msg) => self.on_message(msg, now_ms),
                    Err(e) => {
                        warn!("Link: dropping inbound frame: {}", e);
                        None
                    }
                }
            }
        }
    }

    fn on_message(&mut self, msg: Inbound, now_ms: u32) -> Option<LinkEvent> {
        let identified = self.is_identified();
        match msg {
            Inbound::Identified { advisory_switches } => {
                if identified {
                    debug!("Link: duplicate identified ignored");
                    return None;
                }
                info!(
                    "Link: identified ({} advisory switch entries not applied)",
                    advisory_switches
                );
                self.session.state = LinkState::Identified;
                self.session.last_heartbeat_sent_at = Some(now_ms);
                self.backoff.reset();
                Some(LinkEvent::Identified { advisory_switches })
            }
            Inbound::HeartbeatAck => None,
            Inbound::Error { message } => {
                warn!("Link: coordinator error: {}", message);
                None
            }
            _ if !identified => {
                warn!("Link: message before identified, dropped");
                None
            }
            Inbound::SwitchCommand {
                channel_id,
                requested_state,
            } => Some(LinkEvent::Command {
                channel_id,
                requested_state,
            }),
            Inbound::ConfigUpdate(meta) => Some(LinkEvent::ConfigUpdate(meta)),
            Inbound::Directive(d) => Some(LinkEvent::Directive(d)),
        }
    }

    /// Send a heartbeat if one is due.  Returns `true` if one was sent.
    pub fn heartbeat(
        &mut self,
        transport: &mut impl LinkTransport,
        now_ms: u32,
        uptime_secs: u64,
        offline_mode: bool,
    ) -> bool {
        if !self.is_identified() {
            return false;
        }
        let due = self
            .session
            .last_heartbeat_sent_at
            .is_none_or(|t| elapsed(now_ms, t) >= self.timing.heartbeat_interval_ms);
        if !due {
            return false;
        }
        self.session.last_heartbeat_sent_at = Some(now_ms);
        let node_id = self.node_id.clone();
        self.send(
            transport,
            &Outbound::Heartbeat {
                node_id: &node_id,
                uptime: uptime_secs,
                offline_mode,
            },
        )
        .is_ok()
    }

    /// Encode and send one frame.
    pub fn send(&mut self, transport: &mut impl LinkTransport, msg: &Outbound<'_>) -> Result<(), LinkError> {
        if self.session.state == LinkState::Disconnected || !self.session.transport_open {
            return Err(LinkError::NotConnected);
        }
        let text = msg.encode().map_err(|e| {
            warn!("Link: {} encode failed: {}", msg.kind(), e);
            LinkError::SendFailed
        })?;
        transport.send(&text).inspect_err(|e| {
            warn!("Link: {} send failed: {}", msg.kind(), e);
        })?;
        debug!("Link: sent {}", msg.kind());
        Ok(())
    }

    /// Signature for a state-carrying frame, if signing is enabled.
    pub fn sign_state(&self, seq: u32, ts: u64, switches: &[SwitchState]) -> Option<Signature> {
        self.sign_messages.then(|| {
            signing::sign(
                self.secret.as_bytes(),
                signing::state_payload(seq, ts, switches).as_bytes(),
            )
        })
    }

    fn send_identify(&mut self, transport: &mut impl LinkTransport, now_ms: u32) {
        self.session.last_identify_attempt_at = Some(now_ms);
        let signature = self.sign_messages.then(|| {
            signing::sign(
                self.secret.as_bytes(),
                signing::identify_payload(&self.node_id).as_bytes(),
            )
        });
        let node_id = self.node_id.clone();
        let secret = self.secret.clone();
        let _ = self.send(
            transport,
            &Outbound::Identify {
                node_id: &node_id,
                secret: &secret,
                offline_capable: true,
                signature,
            },
        );
    }

    /// Close the transport and schedule the next attempt.
    fn drop_link(
        &mut self,
        transport: &mut impl LinkTransport,
        now_ms: u32,
        reason: &str,
    ) -> Option<LinkEvent> {
        if self.session.state == LinkState::Disconnected {
            return None;
        }
        transport.close();
        let delay = self.backoff.next_delay();
        warn!("Link: disconnected ({}), reconnect in {} ms", reason, delay);
        self.session = LinkSession::disconnected(now_ms);
        self.next_attempt_at = now_ms.wrapping_add(delay);
        Some(LinkEvent::Disconnected)
    }
}
