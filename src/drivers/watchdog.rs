//! Control-loop stall guard on the ESP-IDF task watchdog.
//!
//! A loop that stops feeding for `timeout_ms` resets the node.  Relay
//! coils drop during the reset; the boot path drives them OFF and then
//! restores the snapshot.

use log::{info, warn};

/// Default stall limit.  Far above the worst blocking call in the loop
/// (a NVS commit or a WebSocket connect).
pub const DEFAULT_TIMEOUT_MS: u32 = 30_000;

pub struct Watchdog {
    timeout_ms: u32,
    armed: bool,
    /// Host only: feed count, for tests.
    #[cfg(not(target_os = "espidf"))]
    feeds: core::cell::Cell<u32>,
}

impl Watchdog {
    /// Arm the task watchdog for the calling task.  A failure to subscribe
    /// is logged and leaves the node running unguarded.
    pub fn arm(timeout_ms: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            use esp_idf_svc::sys::{esp_task_wdt_add, esp_task_wdt_config_t, esp_task_wdt_reconfigure, ESP_OK};

            let cfg = esp_task_wdt_config_t {
                timeout_ms,
                idle_core_mask: 0,
                trigger_panic: true,
            };
            // SAFETY: cfg outlives the call; a null handle means the current task.
            let reconfigured = unsafe { esp_task_wdt_reconfigure(&cfg) };
            if reconfigured != ESP_OK {
                warn!("Watchdog: reconfigure failed ({}), keeping IDF defaults", reconfigured);
            }
            let armed = unsafe { esp_task_wdt_add(core::ptr::null_mut()) } == ESP_OK;
            if armed {
                info!("Watchdog: armed, {} ms", timeout_ms);
            } else {
                warn!("Watchdog: could not subscribe loop task");
            }
            Self { timeout_ms, armed }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("Watchdog: simulated, {} ms", timeout_ms);
            if timeout_ms == 0 {
                warn!("Watchdog: zero timeout, not armed");
            }
            Self {
                timeout_ms,
                armed: timeout_ms > 0,
                feeds: core::cell::Cell::new(0),
            }
        }
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn feed(&self) {
        if !self.armed {
            return;
        }
        #[cfg(target_os = "espidf")]
        // SAFETY: only reached after this task subscribed in `arm`.
        unsafe {
            esp_idf_svc::sys::esp_task_wdt_reset();
        }
        #[cfg(not(target_os = "espidf"))]
        self.feeds.set(self.feeds.get().wrapping_add(1));
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn feed_count(&self) -> u32 {
        self.feeds.get()
    }
}
