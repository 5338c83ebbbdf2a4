//! Fixed-period cadences on the wrapping millisecond clock.
//!
//! ```text
//! ┌──────────────────────────── one tick ─────────────────────────────┐
//! │ sample inputs │ link I/O │ heartbeat │ drain │ broadcast │ snapshot │
//! └───────────────┴──────────┴─────┬─────┴───┬───┴─────┬─────┴────┬─────┘
//!                                  │         │         │          │
//!                          since last send Cadence  min spacing  Cadence
//!                              (30 s)     (100 ms)   (200 ms)    (300 s)
//! ```
//!
//! The heartbeat is not a [`Cadence`]: it is timed from the session's
//! last send, restarted when the link reaches `identified`.
//!
//! The clock is a `u32` that rolls over after ~49.7 days.  Every
//! comparison goes through [`elapsed`] or [`reached`], never a plain `<`.

/// Milliseconds from `since` to `now`, across a rollover.
pub fn elapsed(now_ms: u32, since_ms: u32) -> u32 {
    now_ms.wrapping_sub(since_ms)
}

/// `true` once `now` is at or past `deadline`.  Deadlines are assumed to
/// lie less than half the clock range away.
pub fn reached(now_ms: u32, deadline_ms: u32) -> bool {
    now_ms.wrapping_sub(deadline_ms) < u32::MAX / 2
}

/// A task that runs every `period_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    period_ms: u32,
    last_ms: u32,
}

impl Cadence {
    /// First run is one full period after `now_ms`.
    pub fn starting_at(period_ms: u32, now_ms: u32) -> Self {
        Self {
            period_ms,
            last_ms: now_ms,
        }
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    /// Returns `true` and restarts the period if it has elapsed.
    pub fn poll(&mut self, now_ms: u32) -> bool {
        if elapsed(now_ms, self.last_ms) >= self.period_ms {
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Restart the period from `now_ms`.
    pub fn reset(&mut self, now_ms: u32) {
        self.last_ms = now_ms;
    }
}
