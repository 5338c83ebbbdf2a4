//! Node configuration parameters
//!
//! All tunable parameters for a RelayNode.  Values can be overridden via
//! NVS (non-volatile storage); the factory defaults describe the standard
//! eight-relay classroom board.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::channel::{ChannelId, InputPolarity, MAX_CHANNELS};
use crate::pins;

/// Bounded name string used for node ids, secrets and channel names.
pub type Label = heapless::String<32>;

/// Wiring and naming of one relay channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Stable channel identifier used on the wire.
    pub id: ChannelId,
    /// Human-readable name (e.g. "Fan1").
    pub name: Label,
    /// GPIO driving the relay coil.
    pub relay_gpio: i32,
    /// GPIO of the wall switch, if one is fitted.
    pub input_gpio: Option<i32>,
    /// Electrical level that means "switch closed".
    pub polarity: InputPolarity,
    /// Relay boards sold for the ESP32 are almost always active-low.
    pub relay_active_low: bool,
}

/// Core node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    // --- Identity ---
    /// Identity sent in `identify`; empty means "derive from MAC".
    pub node_id: Label,
    /// Shared secret presented to the coordinator and used as HMAC key.
    pub secret: heapless::String<64>,
    /// Attach HMAC signatures to identify and state broadcasts.
    pub sign_messages: bool,

    // --- Network ---
    /// Station SSID.  Empty keeps the node offline.
    pub wifi_ssid: heapless::String<32>,
    /// WPA2 passphrase, or empty for an open network.
    pub wifi_password: heapless::String<64>,
    /// Coordinator WebSocket endpoint, e.g. `ws://10.0.0.2:8080/ws`.
    pub coordinator_url: heapless::String<128>,
    /// POSIX TZ string used for the quiet window, e.g. `IST-5:30`.
    pub timezone: Label,

    // --- Manual input ---
    /// Input must hold steady this long before a transition is accepted.
    pub debounce_ms: u32,
    /// Manual input sampling period.
    pub sample_interval_ms: u32,
    /// Remote commands are suppressed this long after a manual transition.
    pub manual_priority_ms: u32,

    // --- Remote commands ---
    /// Cadence of the command queue drain.
    pub drain_interval_ms: u32,
    /// Sustained inbound `switch_command` rate (tokens per second).
    pub command_rate_per_sec: u64,
    /// Inbound `switch_command` burst allowance.
    pub command_burst: u64,

    // --- Quiet window ---
    /// Quiet window start hour (0-23). ON requests are deferred inside it.
    pub quiet_start_hour: u8,
    /// Quiet window end hour (0-23, exclusive).
    pub quiet_end_hour: u8,
    /// Deferred commands older than this are discarded unexecuted.
    pub deferred_timeout_secs: u32,

    // --- Persistence ---
    /// Snapshot period.
    pub snapshot_interval_secs: u32,
    /// Snapshots older than this are discarded on boot.
    pub snapshot_max_age_secs: u32,

    // --- Link ---
    /// Heartbeat period while identified.
    pub heartbeat_interval_ms: u32,
    /// Minimum spacing between two state broadcasts.
    pub broadcast_min_spacing_ms: u32,
    /// Identify is resent this often until `identified` arrives.
    pub identify_retry_ms: u32,
    /// No inbound frame for this long drops the link.
    pub link_timeout_ms: u32,
    /// First reconnect delay.
    pub backoff_initial_ms: u32,
    /// Reconnect delay cap.
    pub backoff_max_ms: u32,

    // --- Channels ---
    pub channels: heapless::Vec<ChannelConfig, MAX_CHANNELS>,
}

/// Build a bounded string, truncating anything that does not fit.
pub fn bounded<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Factory channel map: (name, relay GPIO, switch GPIO).
const FACTORY_CHANNELS: [(&str, i32, i32); MAX_CHANNELS] = [
    ("Fan1", pins::RELAY_GPIOS[0], pins::SWITCH_GPIOS[0]),
    ("Fan2", pins::RELAY_GPIOS[1], pins::SWITCH_GPIOS[1]),
    ("Light1", pins::RELAY_GPIOS[2], pins::SWITCH_GPIOS[2]),
    ("Light2", pins::RELAY_GPIOS[3], pins::SWITCH_GPIOS[3]),
    ("Projector", pins::RELAY_GPIOS[4], pins::SWITCH_GPIOS[4]),
    ("NComputing", pins::RELAY_GPIOS[5], pins::SWITCH_GPIOS[5]),
    ("AC Unit", pins::RELAY_GPIOS[6], pins::SWITCH_GPIOS[6]),
    ("Printer", pins::RELAY_GPIOS[7], pins::SWITCH_GPIOS[7]),
];

impl Default for NodeConfig {
    fn default() -> Self {
        let mut channels = heapless::Vec::new();
        for (i, (name, relay, switch)) in FACTORY_CHANNELS.iter().enumerate() {
            // Capacity equals the table length.
            let _ = channels.push(ChannelConfig {
                id: i as ChannelId,
                name: bounded(name),
                relay_gpio: *relay,
                input_gpio: Some(*switch),
                polarity: InputPolarity::ActiveLow,
                relay_active_low: true,
            });
        }

        Self {
            // Identity
            node_id: Label::new(),
            secret: heapless::String::new(),
            sign_messages: true,

            // Network
            wifi_ssid: heapless::String::new(),
            wifi_password: heapless::String::new(),
            coordinator_url: heapless::String::new(),
            timezone: bounded("UTC0"),

            // Manual input
            debounce_ms: 200,
            sample_interval_ms: 10,
            manual_priority_ms: 5_000,

            // Remote commands
            drain_interval_ms: 100,
            command_rate_per_sec: 5,
            command_burst: 5,

            // Quiet window (22:00 – 06:00)
            quiet_start_hour: 22,
            quiet_end_hour: 6,
            deferred_timeout_secs: 12 * 3600,

            // Persistence
            snapshot_interval_secs: 300,
            snapshot_max_age_secs: 24 * 3600,

            // Link
            heartbeat_interval_ms: 30_000,
            broadcast_min_spacing_ms: 200,
            identify_retry_ms: 10_000,
            link_timeout_ms: 90_000,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 60_000,

            channels,
        }
    }
}

impl NodeConfig {
    /// Look up the wiring of one channel.
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// True when both Wi-Fi and the coordinator endpoint are configured.
    pub fn is_networked(&self) -> bool {
        !self.wifi_ssid.is_empty() && !self.coordinator_url.is_empty()
    }

    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.wifi_ssid.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
            return Err(ConfigError::ValidationFailed("wifi_ssid must be printable ASCII"));
        }
        if !self.wifi_password.is_empty() && self.wifi_password.len() < 8 {
            return Err(ConfigError::ValidationFailed(
                "wifi_password must be empty or at least 8 bytes",
            ));
        }
        if !self.coordinator_url.is_empty()
            && !(self.coordinator_url.starts_with("ws://")
                || self.coordinator_url.starts_with("wss://"))
        {
            return Err(ConfigError::ValidationFailed(
                "coordinator_url must be a ws:// or wss:// URL",
            ));
        }
        if !(20..=2_000).contains(&self.debounce_ms) {
            return Err(ConfigError::ValidationFailed("debounce_ms must be 20–2000"));
        }
        if !(1..=20).contains(&self.sample_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "sample_interval_ms must be 1–20",
            ));
        }
        if self.sample_interval_ms >= self.debounce_ms {
            return Err(ConfigError::ValidationFailed(
                "sample_interval_ms must be < debounce_ms",
            ));
        }
        if !(1_000..=60_000).contains(&self.manual_priority_ms) {
            return Err(ConfigError::ValidationFailed(
                "manual_priority_ms must be 1000–60000",
            ));
        }
        if !(10..=1_000).contains(&self.drain_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "drain_interval_ms must be 10–1000",
            ));
        }
        if self.command_rate_per_sec == 0 || self.command_burst == 0 {
            return Err(ConfigError::ValidationFailed(
                "command rate and burst must be non-zero",
            ));
        }
        if self.quiet_start_hour > 23 || self.quiet_end_hour > 23 {
            return Err(ConfigError::ValidationFailed("quiet hours must be 0–23"));
        }
        if !(60..=48 * 3600).contains(&self.deferred_timeout_secs) {
            return Err(ConfigError::ValidationFailed(
                "deferred_timeout_secs must be 60–172800",
            ));
        }
        if !(10..=3_600).contains(&self.snapshot_interval_secs) {
            return Err(ConfigError::ValidationFailed(
                "snapshot_interval_secs must be 10–3600",
            ));
        }
        if self.snapshot_max_age_secs < self.snapshot_interval_secs {
            return Err(ConfigError::ValidationFailed(
                "snapshot_max_age_secs must be >= snapshot_interval_secs",
            ));
        }
        if !(1_000..=300_000).contains(&self.heartbeat_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_interval_ms must be 1000–300000",
            ));
        }
        if self.link_timeout_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::ValidationFailed(
                "link_timeout_ms must exceed heartbeat_interval_ms",
            ));
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ConfigError::ValidationFailed(
                "backoff_max_ms must be >= backoff_initial_ms > 0",
            ));
        }
        if self.channels.is_empty() {
            return Err(ConfigError::ValidationFailed("at least one channel required"));
        }
        for (i, a) in self.channels.iter().enumerate() {
            if self.channels[i + 1..].iter().any(|b| b.id == a.id) {
                return Err(ConfigError::ValidationFailed("duplicate channel id"));
            }
            if a.name.is_empty() {
                return Err(ConfigError::ValidationFailed("channel name must not be empty"));
            }
            let clash = self.channels.iter().enumerate().any(|(j, b)| {
                (j != i && b.relay_gpio == a.relay_gpio)
                    || b.input_gpio == Some(a.relay_gpio)
                    || (j != i && a.input_gpio.is_some() && b.input_gpio == a.input_gpio)
            });
            if clash {
                return Err(ConfigError::ValidationFailed("GPIO assigned twice"));
            }
        }
        Ok(())
    }
}
