//! Mock adapters for integration tests.
//!
//! Every port the [`NodeService`] consumes has a recording double here, so
//! tests can script wall switches, coordinator frames and the clock, then
//! assert on relay writes, outbound frames and emitted events.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use relaynode::app::events::AppEvent;
use relaynode::app::ports::{ActuatorPort, ClockPort, EventSink, InputPort, StorageError, StoragePort};
use relaynode::app::service::{NodeService, TickReport};
use relaynode::channel::{ChannelId, MAX_CHANNELS};
use relaynode::config::NodeConfig;
use relaynode::error::{ActuatorError, InputError, LinkError, Severity};
use relaynode::link::transport::{LinkTransport, TransportEvent};
use relaynode::rate_limit::CommandRateLimiter;
use serde_json::Value;

pub const NODE_ID: &str = "RN-TEST01";

// ── MockRelays ────────────────────────────────────────────────

/// Relay outputs plus wall switch levels.  Switches start open (HIGH on
/// the default active-low wiring).
pub struct MockRelays {
    pub outputs: [bool; MAX_CHANNELS],
    pub levels: [bool; MAX_CHANNELS],
    pub writes: Vec<(ChannelId, bool)>,
    pub fail_writes: bool,
}

impl MockRelays {
    pub fn new() -> Self {
        Self {
            outputs: [false; MAX_CHANNELS],
            levels: [true; MAX_CHANNELS],
            writes: Vec::new(),
            fail_writes: false,
        }
    }

    pub fn close_switch(&mut self, ch: ChannelId) {
        self.levels[ch as usize] = false;
    }

    pub fn open_switch(&mut self, ch: ChannelId) {
        self.levels[ch as usize] = true;
    }

    pub fn is_on(&self, ch: ChannelId) -> bool {
        self.outputs[ch as usize]
    }
}

impl Default for MockRelays {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorPort for MockRelays {
    fn write_output(&mut self, channel: ChannelId, on: bool) -> Result<(), ActuatorError> {
        if self.fail_writes {
            return Err(ActuatorError::GpioWriteFailed);
        }
        let slot = self
            .outputs
            .get_mut(channel as usize)
            .ok_or(ActuatorError::UnknownChannel)?;
        *slot = on;
        self.writes.push((channel, on));
        Ok(())
    }
}

impl InputPort for MockRelays {
    fn read_input(&mut self, channel: ChannelId) -> Result<bool, InputError> {
        self.levels
            .get(channel as usize)
            .copied()
            .ok_or(InputError::GpioReadFailed)
    }
}

// ── MemStore ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MemStore {
    store: HashMap<String, Vec<u8>>,
    pub fail: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_snapshot(&self) -> bool {
        self.exists("relaynode", "snapshot")
    }
}

impl StoragePort for MemStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        if self.fail {
            return Err(StorageError::IoError);
        }
        match self.store.get(&format!("{}::{}", namespace, key)) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail {
            return Err(StorageError::IoError);
        }
        self.store.insert(format!("{}::{}", namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        if self.fail {
            return Err(StorageError::IoError);
        }
        self.store.remove(&format!("{}::{}", namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&format!("{}::{}", namespace, key))
    }
}

// ── ScriptedLink ──────────────────────────────────────────────

/// Coordinator stand-in.  `open` succeeds immediately and queues
/// [`TransportEvent::Opened`]; frames from the coordinator are injected.
#[derive(Default)]
pub struct ScriptedLink {
    pub up: bool,
    pub open: bool,
    pub opens: u32,
    pub sent: Vec<String>,
    pub inbox: VecDeque<TransportEvent>,
}

impl ScriptedLink {
    pub fn inject(&mut self, json: &str) {
        self.inbox.push_back(TransportEvent::Text(json.to_string()));
    }

    pub fn command(&mut self, ch: ChannelId, on: bool) {
        self.inject(&format!(
            r#"{{"type":"switch_command","channelId":{},"requestedState":{}}}"#,
            ch, on
        ));
    }

    pub fn peer_close(&mut self) {
        self.inbox.push_back(TransportEvent::Closed);
    }

    pub fn frames(&self) -> Vec<Value> {
        self.sent
            .iter()
            .map(|s| serde_json::from_str(s).expect("outbound frame is JSON"))
            .collect()
    }

    pub fn frames_of(&self, kind: &str) -> Vec<Value> {
        self.frames().into_iter().filter(|f| f["type"] == kind).collect()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }
}

impl LinkTransport for ScriptedLink {
    fn network_available(&self) -> bool {
        self.up
    }

    fn open(&mut self) -> Result<(), LinkError> {
        if !self.up {
            return Err(LinkError::NetworkDown);
        }
        self.open = true;
        self.opens += 1;
        self.inbox.push_back(TransportEvent::Opened);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.inbox.clear();
    }

    fn send(&mut self, text: &str) -> Result<(), LinkError> {
        if !self.open {
            return Err(LinkError::NotConnected);
        }
        self.sent.push(text.to_string());
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.inbox.pop_front()
    }
}

// ── ManualClock ───────────────────────────────────────────────

pub struct ManualClock {
    pub now: Cell<u32>,
    pub hour: Cell<Option<u8>>,
    /// Wall clock at `now == 0`, if synced.
    pub epoch_base: Cell<Option<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(0),
            hour: Cell::new(None),
            epoch_base: Cell::new(None),
        }
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }

    pub fn set_hour(&self, hour: u8) {
        self.hour.set(Some(hour));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }

    fn uptime_secs(&self) -> u64 {
        u64::from(self.now.get() / 1_000)
    }

    fn current_hour(&self) -> Option<u8> {
        self.hour.get()
    }

    fn epoch_secs(&self) -> Option<u64> {
        self.epoch_base
            .get()
            .map(|base| base + u64::from(self.now.get() / 1_000))
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

impl RecordingSink {
    pub fn discarded(&self, what: &str) -> Vec<Severity> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::Discarded { severity, what: w } if *w == what => Some(*severity),
                _ => None,
            })
            .collect()
    }

    pub fn high_severity_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    AppEvent::Error {
                        severity: Severity::High,
                        ..
                    } | AppEvent::Discarded {
                        severity: Severity::High,
                        ..
                    }
                )
            })
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Harness ───────────────────────────────────────────────────

fn frozen_time() -> Duration {
    Duration::from_secs(1)
}

/// A started [`NodeService`] wired to mocks.  The rate limiter runs on a
/// frozen clock with a large burst so it never interferes unless a test
/// asks for it.
pub struct Harness {
    pub service: NodeService,
    pub hw: MockRelays,
    pub link: ScriptedLink,
    pub store: MemStore,
    pub clock: ManualClock,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(NodeConfig::default(), MemStore::new(), ManualClock::new(), 1_000)
    }

    pub fn with_config(cfg: NodeConfig) -> Self {
        Self::build(cfg, MemStore::new(), ManualClock::new(), 1_000)
    }

    pub fn build(cfg: NodeConfig, store: MemStore, clock: ManualClock, burst: u64) -> Self {
        let limiter = CommandRateLimiter::with_time_provider(5, burst, frozen_time);
        let mut service = NodeService::with_limiter(limiter, cfg, NODE_ID, clock.now_ms());
        let mut hw = MockRelays::new();
        let mut sink = RecordingSink::default();
        service.start(&mut hw, &store, &clock, &mut sink);
        Self {
            service,
            hw,
            link: ScriptedLink::default(),
            store,
            clock,
            sink,
        }
    }

    pub fn tick(&mut self) -> TickReport {
        self.service.tick(
            &mut self.hw,
            &mut self.link,
            &mut self.store,
            &self.clock,
            &mut self.sink,
        )
    }

    /// Advance the clock by `ms`, then tick.
    pub fn step(&mut self, ms: u32) -> TickReport {
        self.clock.advance(ms);
        self.tick()
    }

    /// Tick every 10 ms for `total_ms`.
    pub fn run_for(&mut self, total_ms: u32) {
        for _ in 0..total_ms / 10 {
            self.step(10);
        }
    }

    /// Bring the network up and complete the handshake.
    pub fn connect(&mut self) {
        self.link.up = true;
        self.tick();
        assert!(
            self.link.kinds().iter().any(|k| k == "identify"),
            "identify must be sent once the transport opens"
        );
        self.link.inject(r#"{"type":"identified"}"#);
        self.tick();
        assert!(self.service.link().is_identified());
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
