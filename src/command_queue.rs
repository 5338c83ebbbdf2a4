//! Remote command queue and arbitration engine.
//!
//! Remote commands are checked against the manual override log twice: once
//! on submission and again when the drain step pops them.  A command for a
//! channel whose wall switch moved within the priority window is dropped,
//! never parked for later.
//!
//! Overflow policy is reject-newest: once the queue holds
//! [`QUEUE_CAPACITY`] commands, further submissions are refused until the
//! drain makes room.  Older commands already queued are never displaced.

use log::{debug, info, warn};

use crate::app::ports::ActuatorPort;
use crate::channel::{on_off, ChannelId, ChannelTable};
use crate::debounce::ManualArbiter;
use crate::error::ActuatorError;

/// Maximum number of commands waiting for the drain step.
pub const QUEUE_CAPACITY: usize = 32;

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    Remote,
    Manual,
    Deferred,
}

/// A request to drive one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub channel_id: ChannelId,
    pub requested_state: bool,
    pub source: CommandSource,
    pub enqueued_at_ms: u32,
}

/// Result of [`CommandQueue::submit_remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Dropped: a manual transition on the channel is still within the
    /// priority window.
    Suppressed,
    /// Dropped: the queue is full.
    QueueFull,
}

/// What happened to one command during [`CommandQueue::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Applied { previous: bool },
    Suppressed,
    Failed(ActuatorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainRecord {
    pub command: Command,
    pub outcome: DrainOutcome,
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: heapless::Deque<Command, QUEUE_CAPACITY>,
    overflow_count: u32,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Commands refused because the queue was full, since boot.
    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }

    /// Admit a remote command into the queue.
    pub fn submit_remote(
        &mut self,
        arbiter: &ManualArbiter,
        channel_id: ChannelId,
        requested_state: bool,
        now_ms: u32,
    ) -> SubmitOutcome {
        if arbiter.is_within_priority(channel_id, now_ms) {
            warn!(
                "Queue: remote {} for channel {} suppressed (manual priority)",
                on_off(requested_state),
                channel_id
            );
            return SubmitOutcome::Suppressed;
        }
        self.push(Command {
            channel_id,
            requested_state,
            source: CommandSource::Remote,
            enqueued_at_ms: now_ms,
        })
    }

    /// Push an already-admitted command.
    pub fn push(&mut self, command: Command) -> SubmitOutcome {
        if self.pending.push_back(command).is_err() {
            self.overflow_count = self.overflow_count.saturating_add(1);
            warn!(
                "Queue: full ({} pending), dropping command for channel {}",
                QUEUE_CAPACITY, command.channel_id
            );
            return SubmitOutcome::QueueFull;
        }
        debug!(
            "Queue: channel {} {} queued ({} pending)",
            command.channel_id,
            on_off(command.requested_state),
            self.pending.len()
        );
        SubmitOutcome::Queued
    }

    /// Apply every queued command exactly once, in arrival order.
    ///
    /// Applied commands clear the channel's manual override: an accepted
    /// remote command re-asserts remote authority.
    pub fn drain(
        &mut self,
        channels: &mut ChannelTable,
        arbiter: &ManualArbiter,
        hw: &mut impl ActuatorPort,
        now_ms: u32,
    ) -> heapless::Vec<DrainRecord, QUEUE_CAPACITY> {
        let mut out = heapless::Vec::new();
        while let Some(command) = self.pending.pop_front() {
            let outcome = if command.source != CommandSource::Manual
                && arbiter.is_within_priority(command.channel_id, now_ms)
            {
                warn!(
                    "Queue: channel {} command suppressed at drain (manual priority)",
                    command.channel_id
                );
                DrainOutcome::Suppressed
            } else {
                match channels.drive(hw, command.channel_id, command.requested_state) {
                    Ok(previous) => {
                        channels.set_manual_override(command.channel_id, false);
                        info!(
                            "Queue: applied channel {} {} ({:?})",
                            command.channel_id,
                            on_off(command.requested_state),
                            command.source
                        );
                        DrainOutcome::Applied { previous }
                    }
                    Err(e) => DrainOutcome::Failed(e),
                }
            };
            // Capacity matches the queue, so this never overflows.
            let _ = out.push(DrainRecord { command, outcome });
        }
        out
    }
}
