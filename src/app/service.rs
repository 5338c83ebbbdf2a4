//! Node service: the hexagonal core.
//!
//! [`NodeService`] owns every piece of loop-wide state (channel table,
//! arbiter, queue, deferred table, link) and threads it through one
//! cooperative tick.  All I/O flows through port traits injected at call
//! sites, so the whole service runs against mock adapters in tests.
//!
//! ```text
//!   InputPort ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                 │          NodeService         │
//! ActuatorPort ◀──│ arbiter · queue · quiet ·    │◀──▶ LinkTransport
//!                 │ persistence · link           │
//!  ClockPort ───▶ └──────────────────────────────┘ ◀──▶ StoragePort
//! ```
//!
//! One tick, in order:
//!
//! 0. release a snapshot held for the wall clock, once it syncs
//! 1. sample manual inputs (accepted edges hit the relay immediately)
//! 2. transport I/O and link maintenance
//! 3. heartbeat
//! 4. queue drain (fixed cadence)
//! 5. pending state broadcast (minimum spacing)
//! 6. deferred-command release
//! 7. snapshot (fixed cadence)

use log::{error, info, warn};

use crate::channel::{on_off, ChannelId, ChannelTable, MAX_CHANNELS};
use crate::command_queue::{CommandQueue, DrainOutcome, SubmitOutcome};
use crate::config::NodeConfig;
use crate::debounce::{ManualArbiter, Transition};
use crate::error::{Error, LinkError, Severity};
use crate::link::messages::{AckReason, Outbound, SwitchState};
use crate::link::transport::LinkTransport;
use crate::link::{LinkEvent, LinkState, LinkStateMachine};
use crate::persistence::{PersistedSnapshot, PersistenceManager, RestoreOutcome, Timestamp};
use crate::quiet_window::{Admission, DeferredCommands, QuietHours};
use crate::rate_limit::CommandRateLimiter;
use crate::scheduler::{elapsed, Cadence};

use super::commands::Directive;
use super::events::{ActivitySource, AppEvent};
use super::ports::{ActuatorPort, ClockPort, EventSink, InputPort, StoragePort};

/// How long an epoch-stamped snapshot waits at boot for SNTP before it is
/// applied unchecked.
pub const SNAPSHOT_CLOCK_WAIT_MS: u32 = 60_000;

/// What the caller must do after a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A restart directive was handled: the snapshot is written and the
    /// ack sent.  The binary should reboot now.
    pub restart_requested: bool,
}

// ───────────────────────────────────────────────────────────────
// NodeService
// ───────────────────────────────────────────────────────────────

pub struct NodeService {
    cfg: NodeConfig,
    channels: ChannelTable,
    arbiter: ManualArbiter,
    queue: CommandQueue,
    quiet: QuietHours,
    deferred: DeferredCommands,
    persistence: PersistenceManager,
    link: LinkStateMachine,
    limiter: CommandRateLimiter,
    drain_cadence: Cadence,
    snapshot_cadence: Cadence,
    /// Channel state changed since the last successful broadcast.
    state_dirty: bool,
    last_broadcast_at: Option<u32>,
    /// A wall switch moved while the link was not identified.
    changed_offline: bool,
    /// Reported as `offline_mode` in heartbeats for the current session.
    session_offline_mode: bool,
    /// Snapshot read at boot whose age needs the wall clock, with the time
    /// it was read.
    held_snapshot: Option<(PersistedSnapshot, u32)>,
    tick_count: u64,
}

impl NodeService {
    /// Build the service.  Every channel starts OFF until [`start`](Self::start)
    /// restores the snapshot.
    pub fn new(cfg: NodeConfig, node_id: &str, now_ms: u32) -> Self {
        Self::with_limiter(
            CommandRateLimiter::new(cfg.command_rate_per_sec, cfg.command_burst),
            cfg,
            node_id,
            now_ms,
        )
    }

    /// Same as [`new`](Self::new) with an injected rate limiter.
    pub fn with_limiter(limiter: CommandRateLimiter, cfg: NodeConfig, node_id: &str, now_ms: u32) -> Self {
        Self {
            channels: ChannelTable::from_config(&cfg.channels),
            arbiter: ManualArbiter::new(cfg.debounce_ms, cfg.manual_priority_ms),
            queue: CommandQueue::new(),
            quiet: QuietHours {
                start_hour: cfg.quiet_start_hour,
                end_hour: cfg.quiet_end_hour,
            },
            deferred: DeferredCommands::new(),
            persistence: PersistenceManager::new(cfg.snapshot_max_age_secs),
            link: LinkStateMachine::new(&cfg, node_id, now_ms),
            limiter,
            drain_cadence: Cadence::starting_at(cfg.drain_interval_ms, now_ms),
            snapshot_cadence: Cadence::starting_at(
                cfg.snapshot_interval_secs.saturating_mul(1_000),
                now_ms,
            ),
            state_dirty: false,
            last_broadcast_at: None,
            changed_offline: false,
            session_offline_mode: false,
            held_snapshot: None,
            tick_count: 0,
            cfg,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Drive every relay to a known level, then restore the snapshot.
    /// Returns the number of channels restored.
    pub fn start(
        &mut self,
        hw: &mut impl ActuatorPort,
        store: &impl StoragePort,
        clock: &impl ClockPort,
        sink: &mut impl EventSink,
    ) -> usize {
        let ids: heapless::Vec<ChannelId, MAX_CHANNELS> = self.channels.iter().map(|c| c.id).collect();
        for id in ids {
            if let Err(e) = self.channels.drive(hw, id, false) {
                sink.emit(&AppEvent::error(e.into()));
            }
        }

        let now = Timestamp::now(clock);
        let restored = match self.persistence.restore(store, now) {
            // A standalone node never syncs; its snapshot is trusted as is.
            Ok(snapshot) if snapshot.awaits_wall_clock(now) && self.cfg.is_networked() => {
                info!(
                    "Persist: holding snapshot up to {} s for the wall clock",
                    SNAPSHOT_CLOCK_WAIT_MS / 1_000
                );
                self.held_snapshot = Some((snapshot, clock.now_ms()));
                0
            }
            Ok(snapshot) => self.apply_snapshot(&snapshot, hw, sink),
            Err(RestoreOutcome::Absent) => 0,
            Err(RestoreOutcome::Stale { .. }) => {
                Self::report_stale_snapshot(sink);
                0
            }
            Err(RestoreOutcome::Unreadable(e)) => {
                sink.emit(&AppEvent::error(e.into()));
                0
            }
        };

        info!(
            "NodeService started as {} ({} channels, {} restored)",
            self.link.node_id(),
            self.channels.len(),
            restored
        );
        sink.emit(&AppEvent::Started {
            restored_channels: restored,
        });
        restored
    }

    fn apply_snapshot(
        &mut self,
        snapshot: &PersistedSnapshot,
        hw: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) -> usize {
        let n = snapshot.apply(&mut self.channels, hw);
        let lit = snapshot
            .channels
            .iter()
            .filter(|c| c.output_state && self.channels.get(c.id).is_some_and(|ch| ch.output_state));
        for c in lit {
            sink.emit(&AppEvent::Activity {
                channel_id: c.id,
                state: true,
                source: ActivitySource::Restore,
            });
        }
        self.state_dirty = true;
        n
    }

    fn report_stale_snapshot(sink: &mut impl EventSink) {
        sink.emit(&AppEvent::Discarded {
            severity: Severity::Medium,
            what: "stale snapshot",
        });
    }

    /// Age-check and apply the held snapshot once the wall clock is known,
    /// or apply it unchecked when the wait runs out.  Channels that already
    /// changed since boot keep their live state.
    fn release_held_snapshot(
        &mut self,
        hw: &mut impl ActuatorPort,
        clock: &impl ClockPort,
        sink: &mut impl EventSink,
    ) {
        let now = Timestamp::now(clock);
        let waited = self
            .held_snapshot
            .as_ref()
            .is_some_and(|(_, since)| elapsed(clock.now_ms(), *since) >= SNAPSHOT_CLOCK_WAIT_MS);
        if matches!(now, Timestamp::Uptime(_)) && !waited {
            return;
        }
        let Some((mut snapshot, _)) = self.held_snapshot.take() else {
            return;
        };

        if let Err(RestoreOutcome::Stale { .. }) = self.persistence.check_age(&snapshot, now) {
            Self::report_stale_snapshot(sink);
            return;
        }
        if matches!(now, Timestamp::Uptime(_)) {
            warn!("Persist: wall clock still unsynced, applying snapshot unchecked");
        }

        let channels = &self.channels;
        snapshot.channels.retain(|stored| {
            channels
                .get(stored.id)
                .is_none_or(|c| !c.output_state && !c.manual_override)
        });
        let n = self.apply_snapshot(&snapshot, hw, sink);
        info!("Persist: held snapshot applied to {} channel(s)", n);
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one cooperative cycle.
    ///
    /// The `hw` parameter satisfies **both** [`InputPort`] and
    /// [`ActuatorPort`], so the arbiter can read a switch and drive its
    /// relay without a double mutable borrow.
    pub fn tick(
        &mut self,
        hw: &mut (impl InputPort + ActuatorPort),
        transport: &mut impl LinkTransport,
        store: &mut impl StoragePort,
        clock: &impl ClockPort,
        sink: &mut impl EventSink,
    ) -> TickReport {
        self.tick_count += 1;
        let now = clock.now_ms();
        let mut report = TickReport::default();

        // 0. Held snapshot
        if self.held_snapshot.is_some() {
            self.release_held_snapshot(hw, clock, sink);
        }

        // 1. Manual inputs
        for result in self.arbiter.sample_all(&mut self.channels, hw, now) {
            match result {
                Ok(transition) => self.on_manual_transition(transition, transport, clock, sink),
                Err((_, e)) => sink.emit(&AppEvent::error(e)),
            }
        }

        // 2. Link I/O
        if let Some(event) = self.link.maintain(transport, now) {
            self.on_link_event(event, transport, store, clock, sink, &mut report);
        }
        for event in self.link.poll(transport, now) {
            self.on_link_event(event, transport, store, clock, sink, &mut report);
        }

        // 3. Heartbeat
        self.link
            .heartbeat(transport, now, clock.uptime_secs(), self.session_offline_mode);

        // 4. Queue drain
        if self.drain_cadence.poll(now) {
            self.drain(hw, now, sink);
        }

        // 5. Pending broadcast
        if self.state_dirty && self.link.is_identified() {
            let spaced = self
                .last_broadcast_at
                .is_none_or(|t| elapsed(now, t) >= self.cfg.broadcast_min_spacing_ms);
            if spaced {
                self.broadcast_state(transport, clock, now);
            }
        }

        // 6. Deferred commands
        self.release_deferred(hw, clock, now, sink);

        // 7. Snapshot
        if self.snapshot_cadence.poll(now) {
            let _ = self.save_snapshot(store, clock, sink);
        }

        report
    }

    // ── Manual path ───────────────────────────────────────────

    fn on_manual_transition(
        &mut self,
        t: Transition,
        transport: &mut impl LinkTransport,
        clock: &impl ClockPort,
        sink: &mut impl EventSink,
    ) {
        self.state_dirty = true;

        let reported = if self.link.is_identified() {
            let seq = self.link.next_seq();
            let name = self
                .channels
                .get(t.channel_id)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            self.link
                .send(
                    transport,
                    &Outbound::ManualSwitch {
                        seq,
                        channel_id: t.channel_id,
                        name: &name,
                        action: if t.active { "on" } else { "off" },
                        previous_state: t.previous,
                        new_state: t.active,
                        timestamp: clock.timestamp_secs(),
                    },
                )
                .is_ok()
        } else {
            false
        };

        if !reported {
            // Not replayed later: a stale ON must never fire after reconnect.
            warn!(
                "Manual: channel {} {} not reported (link {:?})",
                t.channel_id,
                on_off(t.active),
                self.link.state()
            );
            self.changed_offline = true;
            sink.emit(&AppEvent::Discarded {
                severity: Severity::High,
                what: "manual event (link down)",
            });
        }

        sink.emit(&AppEvent::ManualSwitch {
            channel_id: t.channel_id,
            previous: t.previous,
            state: t.active,
            reported,
        });
    }

    // ── Link events ───────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn on_link_event(
        &mut self,
        event: LinkEvent,
        transport: &mut impl LinkTransport,
        store: &mut impl StoragePort,
        clock: &impl ClockPort,
        sink: &mut impl EventSink,
        report: &mut TickReport,
    ) {
        let now = clock.now_ms();
        match event {
            LinkEvent::Identified { advisory_switches } => {
                if advisory_switches > 0 {
                    info!(
                        "Link: ignoring {} coordinator switch states, edge state is authoritative",
                        advisory_switches
                    );
                }
                self.session_offline_mode = core::mem::take(&mut self.changed_offline);
                // Full state goes out before any command of this session runs.
                self.broadcast_state(transport, clock, now);
                sink.emit(&AppEvent::DeviceStatus {
                    link: LinkState::Identified,
                    uptime_secs: clock.uptime_secs(),
                });
            }
            LinkEvent::Disconnected => {
                sink.emit(&AppEvent::error(Error::Link(LinkError::NotConnected)));
                sink.emit(&AppEvent::DeviceStatus {
                    link: LinkState::Disconnected,
                    uptime_secs: clock.uptime_secs(),
                });
            }
            LinkEvent::Command {
                channel_id,
                requested_state,
            } => {
                let reason = self.submit_remote(channel_id, requested_state, clock, sink);
                let seq = self.link.next_seq();
                let _ = self.link.send(
                    transport,
                    &Outbound::SwitchAck {
                        seq,
                        channel_id,
                        requested_state,
                        applied: reason.accepted(),
                        reason,
                    },
                );
            }
            LinkEvent::ConfigUpdate(meta) => {
                let keys: Vec<&str> = meta.keys.iter().map(|k| k.as_str()).collect();
                info!(
                    "Link: config_update metadata [{}]{} accepted, not applied",
                    keys.join(", "),
                    if meta.truncated > 0 { " (truncated)" } else { "" }
                );
                if meta.carries_switch_state {
                    warn!("Link: config_update channel states ignored, re-asserting edge state");
                    sink.emit(&AppEvent::Discarded {
                        severity: Severity::Low,
                        what: "config_update channel states",
                    });
                }
                self.state_dirty = true;
            }
            LinkEvent::Directive(d) => self.on_directive(d, transport, store, clock, sink, report),
        }
    }

    /// Route one remote command through rate limit, priority, quiet window
    /// and queue.
    fn submit_remote(
        &mut self,
        channel_id: ChannelId,
        requested_state: bool,
        clock: &impl ClockPort,
        sink: &mut impl EventSink,
    ) -> AckReason {
        let now = clock.now_ms();
        if !self.limiter.allow() {
            warn!("Queue: remote command for channel {} rate limited", channel_id);
            return AckReason::RateLimited;
        }
        if !self.channels.contains(channel_id) {
            warn!("Queue: remote command for unknown channel {}", channel_id);
            return AckReason::UnknownChannel;
        }
        if self.arbiter.is_within_priority(channel_id, now) {
            warn!(
                "Queue: remote {} for channel {} suppressed (manual priority)",
                on_off(requested_state),
                channel_id
            );
            return AckReason::SuppressedManual;
        }

        match self.quiet.admit(requested_state, clock.current_hour()) {
            Admission::Defer => {
                if self.deferred.defer(channel_id, requested_state, now) {
                    AckReason::Deferred
                } else {
                    AckReason::QueueFull
                }
            }
            Admission::Admit => {
                // A later request supersedes anything still parked.
                if self.deferred.cancel(channel_id).is_some() {
                    info!("Quiet: channel {} deferred request superseded", channel_id);
                }
                match self
                    .queue
                    .submit_remote(&self.arbiter, channel_id, requested_state, now)
                {
                    SubmitOutcome::Queued => AckReason::Queued,
                    SubmitOutcome::Suppressed => AckReason::SuppressedManual,
                    SubmitOutcome::QueueFull => {
                        sink.emit(&AppEvent::Discarded {
                            severity: Severity::Medium,
                            what: "remote command (queue full)",
                        });
                        AckReason::QueueFull
                    }
                }
            }
        }
    }

    fn on_directive(
        &mut self,
        directive: Directive,
        transport: &mut impl LinkTransport,
        store: &mut impl StoragePort,
        clock: &impl ClockPort,
        sink: &mut impl EventSink,
        report: &mut TickReport,
    ) {
        info!("Link: directive {}", directive.name());
        let ok = match directive {
            Directive::Restart => {
                let saved = self.save_snapshot(store, clock, sink).is_ok();
                report.restart_requested = true;
                saved
            }
            Directive::SaveStates => self.save_snapshot(store, clock, sink).is_ok(),
            Directive::ClearStates => match self.persistence.clear(store) {
                Ok(()) => true,
                Err(e) => {
                    error!("Persist: clear failed: {}", e);
                    sink.emit(&AppEvent::error(e.into()));
                    false
                }
            },
            Directive::GetStates => {
                let switches = self.switch_states();
                let seq = self.link.next_seq();
                let _ = self.link.send(
                    transport,
                    &Outbound::GetStatesAck {
                        seq,
                        ts: clock.timestamp_secs(),
                        switches: &switches,
                    },
                );
                return;
            }
        };
        if let Some(ack) = Outbound::directive_ack(directive, ok) {
            let _ = self.link.send(transport, &ack);
        }
    }

    // ── Queue, deferred, broadcast, snapshot ──────────────────

    fn drain(&mut self, hw: &mut impl ActuatorPort, now: u32, sink: &mut impl EventSink) {
        for record in self.queue.drain(&mut self.channels, &self.arbiter, hw, now) {
            match record.outcome {
                DrainOutcome::Applied { .. } => {
                    self.state_dirty = true;
                    sink.emit(&AppEvent::Activity {
                        channel_id: record.command.channel_id,
                        state: record.command.requested_state,
                        source: ActivitySource::Remote,
                    });
                }
                DrainOutcome::Suppressed => {}
                DrainOutcome::Failed(e) => sink.emit(&AppEvent::error(e.into())),
            }
        }
    }

    fn release_deferred(
        &mut self,
        hw: &mut impl ActuatorPort,
        clock: &impl ClockPort,
        now: u32,
        sink: &mut impl EventSink,
    ) {
        let staleness_ms = self.cfg.deferred_timeout_secs.saturating_mul(1_000);
        let release = self
            .deferred
            .take_due(&self.quiet, clock.current_hour(), now, staleness_ms);

        for _ in 0..release.stale {
            sink.emit(&AppEvent::Discarded {
                severity: Severity::Medium,
                what: "stale deferred command",
            });
        }

        for entry in release.due {
            if self.arbiter.is_within_priority(entry.channel_id, now) {
                warn!(
                    "Quiet: channel {} deferred command dropped (manual priority)",
                    entry.channel_id
                );
                continue;
            }
            match self.channels.drive(hw, entry.channel_id, entry.requested_state) {
                Ok(_) => {
                    self.channels.set_manual_override(entry.channel_id, false);
                    self.state_dirty = true;
                    info!(
                        "Quiet: channel {} deferred {} executed",
                        entry.channel_id,
                        on_off(entry.requested_state)
                    );
                    sink.emit(&AppEvent::Activity {
                        channel_id: entry.channel_id,
                        state: entry.requested_state,
                        source: ActivitySource::Deferred,
                    });
                }
                Err(e) => sink.emit(&AppEvent::error(e.into())),
            }
        }
    }

    fn broadcast_state(&mut self, transport: &mut impl LinkTransport, clock: &impl ClockPort, now: u32) {
        let switches = self.switch_states();
        let seq = self.link.next_seq();
        let ts = clock.timestamp_secs();
        let signature = self.link.sign_state(seq, ts, &switches);
        let sent = self.link.send(
            transport,
            &Outbound::StateUpdate {
                seq,
                ts,
                switches: &switches,
                signature,
            },
        );
        if sent.is_ok() {
            self.state_dirty = false;
            self.last_broadcast_at = Some(now);
        }
    }

    /// Write a snapshot now.  Failures are logged and reported, never fatal.
    pub fn save_snapshot(
        &mut self,
        store: &mut impl StoragePort,
        clock: &impl ClockPort,
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        self.snapshot_cadence.reset(clock.now_ms());
        self.persistence
            .snapshot(store, &self.channels, Timestamp::now(clock))
            .map_err(|e| {
                let e = Error::from(e);
                sink.emit(&AppEvent::error(e));
                e
            })
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn switch_states(&self) -> heapless::Vec<SwitchState, MAX_CHANNELS> {
        self.channels
            .iter()
            .map(|c| SwitchState {
                channel_id: c.id,
                state: c.output_state,
                manual_override: c.manual_override,
            })
            .collect()
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn link(&self) -> &LinkStateMachine {
        &self.link
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn deferred(&self) -> &DeferredCommands {
        &self.deferred
    }

    pub fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    /// `true` while a boot snapshot waits for the wall clock.
    pub fn is_holding_snapshot(&self) -> bool {
        self.held_snapshot.is_some()
    }

    pub fn is_state_dirty(&self) -> bool {
        self.state_dirty
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}
