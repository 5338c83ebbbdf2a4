//! The concrete host adapters wired into a running service.
//!
//! These exercise the same composition `main` uses on the node, with the
//! simulation backends: GPIO pins behind `HardwareAdapter`, the in-memory
//! NVS store, the simulated WebSocket link and the log sink.

use core::convert::Infallible;
use std::cell::Cell;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use relaynode::adapters::hardware::HardwareAdapter;
use relaynode::adapters::log_sink::LogEventSink;
use relaynode::adapters::nvs::NvsAdapter;
use relaynode::adapters::wifi::{ConnectivityPort, Credentials, WifiAdapter};
use relaynode::adapters::ws_link::WsTransport;
use relaynode::app::ports::{ClockPort, ConfigPort};
use relaynode::app::service::NodeService;
use relaynode::config::{bounded, NodeConfig};
use relaynode::link::transport::TransportEvent;
use relaynode::link::LinkState;

use crate::mock_hw::ManualClock;

/// Output pin whose electrical level the test can observe.
struct Pin(Rc<Cell<bool>>);

impl ErrorType for Pin {
    type Error = Infallible;
}

impl OutputPin for Pin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set(false);
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set(true);
        Ok(())
    }
}

/// Input pin whose level the test drives.
struct Switch(Rc<Cell<bool>>);

impl ErrorType for Switch {
    type Error = Infallible;
}

impl InputPin for Switch {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.get())
    }
    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.get())
    }
}

struct Board {
    hw: HardwareAdapter<Pin, Switch>,
    relay_levels: Vec<Rc<Cell<bool>>>,
    switch_levels: Vec<Rc<Cell<bool>>>,
}

fn board(cfg: &NodeConfig) -> Board {
    let mut hw = HardwareAdapter::new();
    let mut relay_levels = Vec::new();
    let mut switch_levels = Vec::new();
    for ch in &cfg.channels {
        let level = Rc::new(Cell::new(false));
        hw.add_relay(ch.id, Pin(level.clone()), ch.relay_active_low).unwrap();
        relay_levels.push(level);
        // Pull-up: an open switch reads HIGH.
        let sw = Rc::new(Cell::new(true));
        hw.add_input(ch.id, Switch(sw.clone())).unwrap();
        switch_levels.push(sw);
    }
    Board {
        hw,
        relay_levels,
        switch_levels,
    }
}

#[test]
fn wall_switch_drives_active_low_relay_pin() {
    let cfg = NodeConfig::default();
    let mut b = board(&cfg);
    let mut nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let mut link = WsTransport::new("");
    let mut sink = LogEventSink::new();
    let mut service = NodeService::new(cfg, "RN-BENCH1", 0);
    service.start(&mut b.hw, &nvs, &clock, &mut sink);

    // Relays idle HIGH on an active-low board.
    assert!(b.relay_levels.iter().all(|l| l.get()));

    service.tick(&mut b.hw, &mut link, &mut nvs, &clock, &mut sink);
    b.switch_levels[2].set(false);
    for _ in 0..30 {
        clock.advance(10);
        service.tick(&mut b.hw, &mut link, &mut nvs, &clock, &mut sink);
    }
    assert!(!b.relay_levels[2].get(), "ON drives the coil pin LOW");
    assert_eq!(b.hw.is_energised(2), Some(true));
}

#[test]
fn snapshot_survives_service_restart_through_nvs() {
    let cfg = NodeConfig::default();
    let mut nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let mut link = WsTransport::new("");
    let mut sink = LogEventSink::new();

    {
        let mut b = board(&cfg);
        let mut service = NodeService::new(cfg.clone(), "RN-BENCH1", 0);
        service.start(&mut b.hw, &nvs, &clock, &mut sink);
        service.tick(&mut b.hw, &mut link, &mut nvs, &clock, &mut sink);
        b.switch_levels[5].set(false);
        for _ in 0..30 {
            clock.advance(10);
            service.tick(&mut b.hw, &mut link, &mut nvs, &clock, &mut sink);
        }
        service.save_snapshot(&mut nvs, &clock, &mut sink).unwrap();
    }

    let mut b = board(&cfg);
    let mut service = NodeService::new(cfg, "RN-BENCH1", clock.now_ms());
    assert_eq!(service.start(&mut b.hw, &nvs, &clock, &mut sink), 8);
    assert_eq!(b.hw.is_energised(5), Some(true));
    assert!(service.channels().get(5).unwrap().manual_override);
}

#[test]
fn config_roundtrips_through_nvs() {
    let nvs = NvsAdapter::new().unwrap();
    let cfg = NodeConfig {
        node_id: bounded("room-204"),
        quiet_start_hour: 21,
        ..Default::default()
    };
    nvs.save(&cfg).unwrap();
    let loaded = nvs.load().unwrap();
    assert_eq!(loaded.node_id.as_str(), "room-204");
    assert_eq!(loaded.quiet_start_hour, 21);
}

#[test]
fn simulated_websocket_completes_handshake() {
    let cfg = NodeConfig::default();
    let mut b = board(&cfg);
    let mut nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let mut sink = LogEventSink::new();
    let mut wifi = WifiAdapter::new();
    wifi.configure(Credentials::new("Classroom", "password1").unwrap());
    wifi.connect(0).unwrap();
    wifi.poll(0);

    let mut link = WsTransport::new("ws://10.0.0.2:8080/ws");
    link.set_network_available(wifi.is_connected());

    let mut service = NodeService::new(cfg, "RN-BENCH1", 0);
    service.start(&mut b.hw, &nvs, &clock, &mut sink);
    service.tick(&mut b.hw, &mut link, &mut nvs, &clock, &mut sink);

    let sent = link.take_sent();
    assert!(sent.iter().any(|s| s.contains("\"type\":\"identify\"")));

    link.inject(TransportEvent::Text(r#"{"type":"identified"}"#.to_string()));
    service.tick(&mut b.hw, &mut link, &mut nvs, &clock, &mut sink);
    assert_eq!(service.link().state(), LinkState::Identified);
    assert!(link
        .take_sent()
        .iter()
        .any(|s| s.contains("\"type\":\"state_update\"")));
}
