//! Token-bucket limit on inbound remote commands.
//!
//! A coordinator bug or a replayed burst must not be able to chatter the
//! relays.  Commands over the limit are acknowledged as rejected and never
//! reach the queue.

use burster::Limiter;
use core::time::Duration;

pub struct CommandRateLimiter {
    bucket: burster::TokenBucket<fn() -> Duration>,
}

impl CommandRateLimiter {
    /// `rate_per_sec` sustained, `burst` back-to-back.
    pub fn new(rate_per_sec: u64, burst: u64) -> Self {
        Self::with_time_provider(rate_per_sec, burst, platform_now)
    }

    pub fn with_time_provider(rate_per_sec: u64, burst: u64, now: fn() -> Duration) -> Self {
        Self {
            bucket: burster::TokenBucket::new_with_time_provider(rate_per_sec, burst, now),
        }
    }

    /// Consume one token; returns `false` when exhausted.
    pub fn allow(&mut self) -> bool {
        self.bucket.try_consume(1).is_ok()
    }
}

// ── Platform time ────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn platform_now() -> Duration {
    let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    Duration::from_micros(us as u64)
}

#[cfg(not(target_os = "espidf"))]
fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}
