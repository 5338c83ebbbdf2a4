//! ESP32 clock adapter.
//!
//! Implements [`ClockPort`] for the node.
//!
//! - **`target_os = "espidf"`**: monotonic time from `esp_timer_get_time()`,
//!   wall clock from `gettimeofday()` once SNTP has set it.
//! - **`not(target_os = "espidf")`**: `std::time::Instant` for monotonic
//!   time; the wall clock is reported as unsynced.

use log::{info, warn};

use crate::app::ports::ClockPort;

/// Anything before 2020-01-01 means SNTP has not run yet.
#[cfg(target_os = "espidf")]
const EPOCH_2020: i64 = 1_577_836_800;

pub struct Esp32Clock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for Esp32Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32Clock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Set the POSIX `TZ` rule used for the local hour, e.g.
    /// `"CET-1CEST,M3.5.0,M10.5.0/3"`.  Returns `false` and keeps UTC if
    /// the string cannot be passed to libc.
    pub fn set_timezone(&self, tz: &str) -> bool {
        let Ok(value) = std::ffi::CString::new(tz) else {
            warn!("Clock: timezone contains NUL, staying on UTC");
            return false;
        };
        #[cfg(target_os = "espidf")]
        // SAFETY: both strings are NUL-terminated and outlive the calls.
        unsafe {
            esp_idf_svc::sys::setenv(c"TZ".as_ptr(), value.as_ptr(), 1);
            esp_idf_svc::sys::tzset();
        }
        info!("Clock: timezone {:?}", value);
        true
    }

    #[cfg(target_os = "espidf")]
    fn uptime_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    #[cfg(not(target_os = "espidf"))]
    fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    #[cfg(target_os = "espidf")]
    fn synced_epoch(&self) -> Option<i64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        let secs = tv.tv_sec as i64;
        (secs >= EPOCH_2020).then_some(secs)
    }
}

impl ClockPort for Esp32Clock {
    fn now_ms(&self) -> u32 {
        // Truncation gives the wrapping millisecond counter.
        (self.uptime_us() / 1_000) as u32
    }

    fn uptime_secs(&self) -> u64 {
        self.uptime_us() / 1_000_000
    }

    #[cfg(target_os = "espidf")]
    fn current_hour(&self) -> Option<u8> {
        let secs = self.synced_epoch()? as esp_idf_svc::sys::time_t;
        let mut tm: esp_idf_svc::sys::tm = unsafe { core::mem::zeroed() };
        if unsafe { esp_idf_svc::sys::localtime_r(&secs, &mut tm) }.is_null() {
            return None;
        }
        u8::try_from(tm.tm_hour).ok().filter(|h| *h < 24)
    }

    #[cfg(not(target_os = "espidf"))]
    fn current_hour(&self) -> Option<u8> {
        None
    }

    #[cfg(target_os = "espidf")]
    fn epoch_secs(&self) -> Option<u64> {
        self.synced_epoch().map(|s| s as u64)
    }

    #[cfg(not(target_os = "espidf"))]
    fn epoch_secs(&self) -> Option<u64> {
        None
    }
}
