//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the logger (UART on the node).  The external logging service scrapes
//! these lines; a push adapter would implement the same trait.

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::channel::on_off;
use crate::error::Severity;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Activity {
                channel_id,
                state,
                source,
            } => {
                info!("ACTIVITY | ch={} | {} | source={:?}", channel_id, on_off(*state), source);
            }
            AppEvent::ManualSwitch {
                channel_id,
                previous,
                state,
                reported,
            } => {
                info!(
                    "MANUAL | ch={} | {} -> {} | reported={}",
                    channel_id,
                    on_off(*previous),
                    on_off(*state),
                    reported
                );
            }
            AppEvent::Error { severity, error } => match severity {
                Severity::High => error!("ERROR | severity={} | {}", severity, error),
                _ => warn!("ERROR | severity={} | {}", severity, error),
            },
            AppEvent::Discarded { severity, what } => {
                warn!("DISCARD | severity={} | {}", severity, what);
            }
            AppEvent::DeviceStatus { link, uptime_secs } => {
                info!("STATUS | link={:?} | uptime={}s", link, uptime_secs);
            }
            AppEvent::Started { restored_channels } => {
                info!("START | restored_channels={}", restored_channels);
            }
        }
    }
}
