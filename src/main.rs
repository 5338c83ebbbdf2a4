//! RelayNode Firmware: Main Entry Point
//!
//! Hexagonal architecture with a single cooperative control loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareAdapter   LogEventSink   NvsAdapter    Esp32Clock     │
//! │  (Actuator+Input)  (EventSink)    (Config+NVS)  (ClockPort)    │
//! │  WifiAdapter       WsTransport                                 │
//! │  (Connectivity)    (LinkTransport)                             │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              NodeService (pure logic)                  │    │
//! │  │  Arbiter · Queue · Quiet window · Link · Persistence   │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Watchdog · ~10 ms loop                                        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use log::{error, info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{AnyInputPin, AnyOutputPin, Input, Output, PinDriver, Pull};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::sntp::EspSntp;
use esp_idf_svc::wifi::EspWifi;

use relaynode::adapters::device_id;
use relaynode::adapters::hardware::HardwareAdapter;
use relaynode::adapters::log_sink::LogEventSink;
use relaynode::adapters::nvs::NvsAdapter;
use relaynode::adapters::time::Esp32Clock;
use relaynode::adapters::wifi::{ConnectivityPort, Credentials, WifiAdapter};
use relaynode::adapters::ws_link::WsTransport;
use relaynode::app::ports::{ClockPort, ConfigPort};
use relaynode::app::service::NodeService;
use relaynode::channel::InputPolarity;
use relaynode::config::NodeConfig;
use relaynode::drivers::watchdog::{Watchdog, DEFAULT_TIMEOUT_MS};

/// Loop spacing.  Manual sampling needs well under the debounce window.
const LOOP_PERIOD_MS: u32 = 10;

type Relay = PinDriver<'static, AnyOutputPin, Output>;
type Switch = PinDriver<'static, AnyInputPin, Input>;

fn build_hardware(config: &NodeConfig) -> Result<HardwareAdapter<Relay, Switch>> {
    let mut hw = HardwareAdapter::new();
    for ch in &config.channels {
        // SAFETY: validate() rejects any GPIO listed twice, so each pin is
        // claimed exactly once, and nothing else in the firmware uses them.
        let relay = PinDriver::output(unsafe { AnyOutputPin::new(ch.relay_gpio) })
            .with_context(|| format!("relay GPIO {}", ch.relay_gpio))?;
        hw.add_relay(ch.id, relay, ch.relay_active_low)
            .map_err(|e| anyhow::anyhow!("relay {}: {}", ch.name, e))?;

        if let Some(gpio) = ch.input_gpio {
            // SAFETY: as above.
            let mut input = PinDriver::input(unsafe { AnyInputPin::new(gpio) })
                .with_context(|| format!("switch GPIO {}", gpio))?;
            let pull = match ch.polarity {
                InputPolarity::ActiveLow => Pull::Up,
                InputPolarity::ActiveHigh => Pull::Down,
            };
            input.set_pull(pull)?;
            hw.add_input(ch.id, input)
                .map_err(|e| anyhow::anyhow!("switch {}: {}", ch.name, e))?;
        }
    }
    Ok(hw)
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("RelayNode v{}", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let watchdog = Watchdog::arm(DEFAULT_TIMEOUT_MS);

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let mut nvs = NvsAdapter::new().unwrap_or_else(|e| {
        error!("NVS init failed ({}), running without persistence", e);
        NvsAdapter::default()
    });
    let config = nvs.load().unwrap_or_else(|e| {
        warn!("NVS config load failed ({}), using defaults", e);
        NodeConfig::default()
    });
    let node_id = device_id::resolve(&config.node_id);

    // ── 3. Hardware ───────────────────────────────────────────
    // Relays are driven OFF here, before anything else can run.
    let mut hw = build_hardware(&config)?;
    let clock = Esp32Clock::new();
    clock.set_timezone(&config.timezone);
    let mut sink = LogEventSink::new();

    // ── 4. Network ────────────────────────────────────────────
    let mut wifi = WifiAdapter::new(EspWifi::new(peripherals.modem, sysloop, nvs.partition())?);
    let mut transport = WsTransport::new(&config.coordinator_url);
    let _sntp = if config.is_networked() {
        wifi.configure(Credentials::new(&config.wifi_ssid, &config.wifi_password)?);
        if let Err(e) = wifi.connect(clock.now_ms()) {
            warn!("WiFi: first attempt failed ({}), retrying in background", e);
        }
        Some(EspSntp::new_default()?)
    } else {
        info!("No network configured, running standalone");
        None
    };

    // ── 5. Service ────────────────────────────────────────────
    let mut service = NodeService::new(config, &node_id, clock.now_ms());
    service.start(&mut hw, &nvs, &clock, &mut sink);

    info!("System ready. Entering control loop.");

    // ── 6. Control loop ───────────────────────────────────────
    loop {
        wifi.poll(clock.now_ms());
        transport.set_network_available(wifi.is_connected());

        let report = service.tick(&mut hw, &mut transport, &mut nvs, &clock, &mut sink);
        watchdog.feed();

        if report.restart_requested {
            info!("Restart requested, rebooting");
            FreeRtos::delay_ms(100);
            // SAFETY: does not return.
            unsafe { esp_idf_svc::sys::esp_restart() };
        }

        FreeRtos::delay_ms(LOOP_PERIOD_MS);
    }
}
