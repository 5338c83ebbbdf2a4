//! Coordinator wire format: JSON text frames with a `type` discriminator.
//!
//! | Message          | Dir | Fields                                              |
//! |------------------|-----|-----------------------------------------------------|
//! | identify         | →   | nodeId, secret, offline_capable, signature?         |
//! | state_update     | →   | seq, ts, switches[{channelId,state,manualOverride}] |
//! | heartbeat        | →   | nodeId, uptime, offline_mode                        |
//! | manual_switch    | →   | seq, channelId, action, previousState, newState, …  |
//! | switch_ack       | →   | seq, channelId, requestedState, applied, reason     |
//! | *_ack            | →   | directive acknowledgements                          |
//! | identified       | ←   | switches[]? (advisory, never applied)               |
//! | switch_command   | ←   | channelId, requestedState                           |
//! | config_update    | ←   | metadata only                                       |
//! | heartbeat_ack    | ←   | (none)                                              |
//! | restart / clear_states / save_states / get_states  ←  directives          |
//!
//! Outbound frames are serde-derived.  Inbound frames are decoded in two
//! steps (JSON value, then per-type field extraction) so an unknown `type`
//! is distinguishable from a malformed frame.

use serde::Serialize;
use serde_json::Value;

use crate::app::commands::Directive;
use crate::channel::ChannelId;
use crate::error::WireError;

/// Hex HMAC-SHA256 tag.
pub type Signature = heapless::String<64>;

/// One channel as reported to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwitchState {
    #[serde(rename = "channelId")]
    pub channel_id: ChannelId,
    pub state: bool,
    #[serde(rename = "manualOverride")]
    pub manual_override: bool,
}

/// Reason attached to a `switch_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckReason {
    Queued,
    Deferred,
    SuppressedManual,
    QueueFull,
    UnknownChannel,
    RateLimited,
}

impl AckReason {
    /// Whether the command will (eventually) reach the relay.
    pub fn accepted(self) -> bool {
        matches!(self, Self::Queued | Self::Deferred)
    }
}

// ── Outbound ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound<'a> {
    Identify {
        #[serde(rename = "nodeId")]
        node_id: &'a str,
        secret: &'a str,
        offline_capable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<Signature>,
    },
    StateUpdate {
        seq: u32,
        ts: u64,
        switches: &'a [SwitchState],
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<Signature>,
    },
    Heartbeat {
        #[serde(rename = "nodeId")]
        node_id: &'a str,
        uptime: u64,
        offline_mode: bool,
    },
    ManualSwitch {
        seq: u32,
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
        name: &'a str,
        action: &'static str,
        #[serde(rename = "previousState")]
        previous_state: bool,
        #[serde(rename = "newState")]
        new_state: bool,
        timestamp: u64,
    },
    SwitchAck {
        seq: u32,
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
        #[serde(rename = "requestedState")]
        requested_state: bool,
        applied: bool,
        reason: AckReason,
    },
    RestartAck {
        ok: bool,
    },
    ClearStatesAck {
        ok: bool,
    },
    SaveStatesAck {
        ok: bool,
    },
    GetStatesAck {
        seq: u32,
        ts: u64,
        switches: &'a [SwitchState],
    },
}

impl Outbound<'_> {
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(|_| WireError::Encode)
    }

    /// Message type as it appears on the wire, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::StateUpdate { .. } => "state_update",
            Self::Heartbeat { .. } => "heartbeat",
            Self::ManualSwitch { .. } => "manual_switch",
            Self::SwitchAck { .. } => "switch_ack",
            Self::RestartAck { .. } => "restart_ack",
            Self::ClearStatesAck { .. } => "clear_states_ack",
            Self::SaveStatesAck { .. } => "save_states_ack",
            Self::GetStatesAck { .. } => "get_states_ack",
        }
    }

    /// Bare acknowledgement for a control directive.  `get_states` is
    /// answered with the full state instead, so it has none.
    pub fn directive_ack(directive: Directive, ok: bool) -> Option<Self> {
        match directive {
            Directive::Restart => Some(Self::RestartAck { ok }),
            Directive::ClearStates => Some(Self::ClearStatesAck { ok }),
            Directive::SaveStates => Some(Self::SaveStatesAck { ok }),
            Directive::GetStates => None,
        }
    }
}

// ── Inbound ──────────────────────────────────────────────────

const MAX_METADATA_KEYS: usize = 8;

/// What a `config_update` carried.  Key names are kept for the log; no
/// value is ever read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    pub keys: heapless::Vec<heapless::String<24>, MAX_METADATA_KEYS>,
    /// Keys past the first `MAX_METADATA_KEYS`.
    pub truncated: usize,
    /// The push tried to set channel state.
    pub carries_switch_state: bool,
}

impl ConfigMetadata {
    fn from_object(obj: &serde_json::Map<String, Value>) -> Self {
        let mut meta = Self::default();
        for key in obj.keys().filter(|k| k.as_str() != "type") {
            if meta.keys.push(crate::config::bounded(key)).is_err() {
                meta.truncated += 1;
            }
            if key == "switches" {
                meta.carries_switch_state = true;
            }
        }
        meta
    }

    pub fn len(&self) -> usize {
        self.keys.len() + self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Handshake reply.  Any channel list it carries is counted, never
    /// applied.
    Identified { advisory_switches: usize },
    SwitchCommand {
        channel_id: ChannelId,
        requested_state: bool,
    },
    /// Metadata-only configuration push.
    ConfigUpdate(ConfigMetadata),
    HeartbeatAck,
    Directive(Directive),
    Error { message: heapless::String<64> },
}

impl Inbound {
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let value: Value = serde_json::from_str(text).map_err(|_| WireError::Malformed)?;
        let obj = value.as_object().ok_or(WireError::Malformed)?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingType)?;

        match kind {
            "identified" => Ok(Self::Identified {
                advisory_switches: obj
                    .get("switches")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len),
            }),
            "switch_command" => {
                let channel_id = obj
                    .get("channelId")
                    .and_then(Value::as_u64)
                    .and_then(|n| ChannelId::try_from(n).ok())
                    .ok_or(WireError::InvalidField("channelId"))?;
                let requested_state = obj
                    .get("requestedState")
                    .and_then(Value::as_bool)
                    .ok_or(WireError::InvalidField("requestedState"))?;
                Ok(Self::SwitchCommand {
                    channel_id,
                    requested_state,
                })
            }
            "config_update" => Ok(Self::ConfigUpdate(ConfigMetadata::from_object(obj))),
            "heartbeat_ack" => Ok(Self::HeartbeatAck),
            "restart" => Ok(Self::Directive(Directive::Restart)),
            "clear_states" => Ok(Self::Directive(Directive::ClearStates)),
            "save_states" => Ok(Self::Directive(Directive::SaveStates)),
            "get_states" => Ok(Self::Directive(Directive::GetStates)),
            "error" => {
                let text = obj.get("message").and_then(Value::as_str).unwrap_or("");
                Ok(Self::Error {
                    message: crate::config::bounded(text),
                })
            }
            _ => Err(WireError::UnknownType),
        }
    }
}
