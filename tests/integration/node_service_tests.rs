//! End-to-end scenarios for the control loop.
//!
//! Each test drives a started [`NodeService`] through the mock adapters in
//! `mock_hw` on the wrapping millisecond clock, ticking every 10 ms the way
//! the firmware loop does.

use relaynode::app::events::{ActivitySource, AppEvent};
use relaynode::app::service::SNAPSHOT_CLOCK_WAIT_MS;
use relaynode::channel::ChannelTable;
use relaynode::config::{bounded, NodeConfig};
use relaynode::error::Severity;
use relaynode::link::LinkState;
use relaynode::persistence::{PersistenceManager, Timestamp};

use crate::mock_hw::{Harness, ManualClock, MemStore, MockRelays};

const HOUR_MS: u32 = 3_600_000;

fn acks(h: &Harness) -> Vec<String> {
    h.link
        .frames_of("switch_ack")
        .iter()
        .map(|f| f["reason"].as_str().unwrap_or_default().to_string())
        .collect()
}

// ── Manual priority ───────────────────────────────────────────

#[test]
fn manual_switch_suppresses_remote_command_for_priority_window() {
    let mut h = Harness::new();
    h.connect();
    h.link.clear_sent();

    // Fan1 switched on at the wall.
    h.hw.close_switch(0);
    h.run_for(250);
    assert!(h.hw.is_on(0));

    let manual = h.link.frames_of("manual_switch");
    assert_eq!(manual.len(), 1);
    assert_eq!(manual[0]["channelId"], 0);
    assert_eq!(manual[0]["name"], "Fan1");
    assert_eq!(manual[0]["action"], "on");
    assert_eq!(manual[0]["previousState"], false);
    assert_eq!(manual[0]["newState"], true);

    // Remote OFF two seconds later is dropped, not parked.
    h.link.command(0, false);
    h.step(10);
    assert_eq!(acks(&h), vec!["suppressed_manual"]);
    assert_eq!(h.link.frames_of("switch_ack")[0]["applied"], false);
    h.run_for(200);
    assert!(h.hw.is_on(0), "suppressed command must never run");
    assert!(h.service.queue().is_empty());

    // Once the window has passed the coordinator regains control.
    h.clock.advance(5_000);
    h.link.command(0, false);
    h.tick();
    h.step(100);
    assert_eq!(acks(&h), vec!["suppressed_manual", "queued"]);
    assert!(!h.hw.is_on(0));
    let fan = h.service.channels().get(0).unwrap();
    assert!(!fan.manual_override, "applied remote command clears the override flag");
}

#[test]
fn busy_neighbouring_switches_keep_priority_alive() {
    let mut h = Harness::new();
    h.connect();
    h.link.clear_sent();

    h.hw.close_switch(0);
    h.run_for(250);
    assert!(h.hw.is_on(0));

    // 21 accepted transitions on channels 1..=7 inside the window.
    for round in 0..3 {
        for ch in 1..8 {
            if round % 2 == 0 {
                h.hw.close_switch(ch);
            } else {
                h.hw.open_switch(ch);
            }
        }
        h.run_for(250);
    }
    assert_eq!(h.link.frames_of("manual_switch").len(), 22);

    h.link.command(0, false);
    h.step(10);
    assert_eq!(acks(&h), vec!["suppressed_manual"]);
    h.run_for(200);
    assert!(h.hw.is_on(0));
}

#[test]
fn priority_is_rechecked_when_the_queue_drains() {
    let mut h = Harness::new();
    h.connect();
    h.run_for(50);

    h.hw.close_switch(0);
    h.run_for(190);
    // Queued before the switch transition is accepted...
    h.link.command(0, false);
    h.step(10);
    assert_eq!(acks(&h), vec!["queued"]);
    // ...then the wall switch wins before the next drain.
    h.step(10);
    assert!(h.hw.is_on(0));
    h.run_for(50);

    assert!(h.hw.is_on(0));
    assert!(h.service.queue().is_empty());
}

#[test]
fn manual_transitions_ignore_quiet_window() {
    let mut h = Harness::new();
    h.clock.set_hour(23);
    h.tick();
    h.hw.close_switch(4);
    h.run_for(300);
    assert!(h.hw.is_on(4));

    h.hw.open_switch(4);
    h.run_for(300);
    assert!(!h.hw.is_on(4));
}

// ── Quiet window ──────────────────────────────────────────────

#[test]
fn quiet_window_defers_on_until_morning() {
    let mut h = Harness::new();
    h.clock.set_hour(23);
    h.connect();

    // Light1 ON at 23:00.
    h.link.command(2, true);
    h.tick();
    let ack = &h.link.frames_of("switch_ack")[0];
    assert_eq!(ack["reason"], "deferred");
    assert_eq!(ack["applied"], true);
    assert_eq!(h.service.deferred().len(), 1);

    h.run_for(1_000);
    assert!(!h.hw.is_on(2));

    // 06:01: executed exactly once.
    h.clock.set_hour(6);
    h.step(7 * HOUR_MS + 60_000);
    assert!(h.hw.is_on(2));
    assert!(h.service.deferred().is_empty());
    let deferred_runs = h
        .sink
        .events
        .iter()
        .filter(|e| {
            matches!(
                e,
                AppEvent::Activity {
                    channel_id: 2,
                    source: ActivitySource::Deferred,
                    ..
                }
            )
        })
        .count();
    assert_eq!(deferred_runs, 1);
}

#[test]
fn quiet_window_never_holds_off() {
    let mut h = Harness::new();
    h.clock.set_hour(12);
    h.connect();
    h.link.command(3, true);
    h.step(100);
    assert!(h.hw.is_on(3));

    h.clock.set_hour(23);
    h.link.command(3, false);
    h.step(100);
    assert!(!h.hw.is_on(3));
    assert_eq!(acks(&h), vec!["queued", "queued"]);
}

#[test]
fn later_off_cancels_parked_on() {
    let mut h = Harness::new();
    h.clock.set_hour(22);
    h.connect();
    h.link.command(2, true);
    h.link.command(2, false);
    h.tick();
    assert_eq!(acks(&h), vec!["deferred", "queued"]);
    assert!(h.service.deferred().is_empty());

    h.clock.set_hour(7);
    h.step(100);
    assert!(!h.hw.is_on(2));
}

#[test]
fn stale_deferred_command_is_discarded() {
    let mut h = Harness::new();
    h.clock.set_hour(22);
    h.connect();
    h.link.command(5, true);
    h.tick();

    // Clock never left the window for 13 hours, then does.
    h.clock.advance(13 * HOUR_MS);
    h.clock.set_hour(11);
    h.tick();
    assert!(!h.hw.is_on(5));
    assert_eq!(h.sink.discarded("stale deferred command"), vec![Severity::Medium]);
}

// ── Persistence ───────────────────────────────────────────────

fn stored_snapshot(saved_at: u64) -> MemStore {
    let cfg = NodeConfig::default();
    let mut table = ChannelTable::from_config(&cfg.channels);
    let mut relays = MockRelays::new();
    table.drive(&mut relays, 1, true).unwrap();
    let mut store = MemStore::new();
    PersistenceManager::new(cfg.snapshot_max_age_secs)
        .snapshot(&mut store, &table, Timestamp::Epoch(saved_at))
        .unwrap();
    store
}

const SAVED_AT: u64 = 1_700_000_000;

#[test]
fn snapshot_older_than_a_day_is_discarded() {
    let clock = ManualClock::new();
    clock.epoch_base.set(Some(SAVED_AT + 30 * 3_600));
    let h = Harness::build(NodeConfig::default(), stored_snapshot(SAVED_AT), clock, 1_000);

    assert!(!h.hw.is_on(1));
    assert_eq!(h.sink.discarded("stale snapshot"), vec![Severity::Medium]);
    assert!(h.sink.events.contains(&AppEvent::Started { restored_channels: 0 }));
}

#[test]
fn recent_snapshot_is_restored_and_reported_on_connect() {
    let clock = ManualClock::new();
    clock.epoch_base.set(Some(SAVED_AT + 3_600));
    let mut h = Harness::build(NodeConfig::default(), stored_snapshot(SAVED_AT), clock, 1_000);

    // All relays forced OFF first, then the snapshot applied.
    assert!(h.hw.writes[..8].iter().all(|(_, on)| !on));
    assert!(h.hw.is_on(1));
    assert!(h.service.is_state_dirty());

    h.connect();
    let update = &h.link.frames_of("state_update")[0];
    assert_eq!(update["switches"][1]["state"], true);
    assert!(!h.service.is_state_dirty());
}

#[test]
fn snapshot_ahead_of_clock_is_trusted() {
    let clock = ManualClock::new();
    clock.epoch_base.set(Some(SAVED_AT - 3_600));
    let h = Harness::build(NodeConfig::default(), stored_snapshot(SAVED_AT), clock, 1_000);
    assert!(h.hw.is_on(1));
}

#[test]
fn standalone_node_restores_without_wall_clock() {
    let h = Harness::build(
        NodeConfig::default(),
        stored_snapshot(SAVED_AT),
        ManualClock::new(),
        1_000,
    );
    assert!(!h.service.is_holding_snapshot());
    assert!(h.hw.is_on(1));
}

fn networked() -> NodeConfig {
    NodeConfig {
        wifi_ssid: bounded("Lab-204"),
        coordinator_url: bounded("ws://10.0.0.2:8080/ws"),
        ..Default::default()
    }
}

#[test]
fn day_old_snapshot_found_before_sntp_is_discarded_at_sync() {
    let mut h = Harness::build(networked(), stored_snapshot(SAVED_AT), ManualClock::new(), 1_000);
    assert!(h.service.is_holding_snapshot());
    assert!(!h.hw.is_on(1));
    assert!(h.sink.events.contains(&AppEvent::Started { restored_channels: 0 }));

    h.run_for(500);
    assert!(h.service.is_holding_snapshot());

    // SNTP lands: the snapshot turns out to be 30 h old.
    h.clock.epoch_base.set(Some(SAVED_AT + 30 * 3_600));
    h.tick();
    assert!(!h.service.is_holding_snapshot());
    assert!(!h.hw.is_on(1));
    assert_eq!(h.sink.discarded("stale snapshot"), vec![Severity::Medium]);
}

#[test]
fn fresh_snapshot_found_before_sntp_is_applied_at_sync() {
    let mut h = Harness::build(networked(), stored_snapshot(SAVED_AT), ManualClock::new(), 1_000);
    h.run_for(200);
    assert!(!h.hw.is_on(1));

    h.clock.epoch_base.set(Some(SAVED_AT + 3_600));
    h.tick();
    assert!(h.hw.is_on(1));
    assert!(h.service.is_state_dirty());
    assert!(h.sink.events.contains(&AppEvent::Activity {
        channel_id: 1,
        state: true,
        source: ActivitySource::Restore,
    }));
    assert!(h.sink.discarded("stale snapshot").is_empty());
}

#[test]
fn held_snapshot_applied_unchecked_when_sntp_never_arrives() {
    let mut h = Harness::build(networked(), stored_snapshot(SAVED_AT), ManualClock::new(), 1_000);
    h.step(SNAPSHOT_CLOCK_WAIT_MS - 10);
    assert!(!h.hw.is_on(1));
    h.step(10);
    assert!(!h.service.is_holding_snapshot());
    assert!(h.hw.is_on(1));
}

#[test]
fn switch_moved_while_snapshot_held_keeps_live_state() {
    let mut h = Harness::build(networked(), stored_snapshot(SAVED_AT), ManualClock::new(), 1_000);
    h.tick();
    h.hw.close_switch(1);
    h.run_for(300);
    h.hw.open_switch(1);
    h.run_for(300);
    assert!(!h.hw.is_on(1));

    h.clock.epoch_base.set(Some(SAVED_AT + 3_600));
    h.tick();
    assert!(!h.service.is_holding_snapshot());
    assert!(!h.hw.is_on(1), "the wall switch outranks the snapshot");
}

#[test]
fn periodic_snapshot_and_store_failure_is_not_fatal() {
    let mut h = Harness::new();
    h.step(300_000);
    assert!(h.store.has_snapshot());

    h.store.fail = true;
    h.step(300_000);
    let high_storage_errors = h
        .sink
        .events
        .iter()
        .filter(|e| matches!(e, AppEvent::Error { severity: Severity::High, .. }))
        .count();
    assert_eq!(high_storage_errors, 1);

    // Loop keeps running on in-memory state.
    h.hw.close_switch(6);
    h.run_for(300);
    assert!(h.hw.is_on(6));
}

// ── Link and reconciliation ───────────────────────────────────

#[test]
fn reconnect_broadcasts_state_before_commands() {
    let mut h = Harness::new();
    h.connect();
    h.link.peer_close();
    h.tick();
    assert_eq!(h.service.link().state(), LinkState::Disconnected);

    h.link.clear_sent();
    h.step(2_000);
    assert_eq!(h.service.link().state(), LinkState::Connecting);

    h.link.inject(r#"{"type":"identified"}"#);
    h.link.command(4, true);
    h.tick();

    let kinds = h.link.kinds();
    let update = kinds.iter().position(|k| k == "state_update").unwrap();
    let ack = kinds.iter().position(|k| k == "switch_ack").unwrap();
    assert!(update < ack, "state must reach the coordinator first: {:?}", kinds);
}

#[test]
fn sequence_numbers_increase_across_reconnects() {
    let mut h = Harness::new();
    h.connect();
    h.hw.close_switch(0);
    h.run_for(300);
    h.link.command(1, true);
    h.link.inject(r#"{"type":"get_states"}"#);
    h.step(200);

    h.link.peer_close();
    h.tick();
    h.step(2_000);
    h.link.inject(r#"{"type":"identified"}"#);
    h.link.command(2, true);
    h.tick();

    let seqs: Vec<u64> = h
        .link
        .frames()
        .iter()
        .filter_map(|f| f["seq"].as_u64())
        .collect();
    assert!(seqs.len() >= 6, "{:?}", seqs);
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{:?}", seqs);
}

#[test]
fn offline_manual_event_is_not_replayed() {
    let mut h = Harness::new();
    h.tick();
    h.hw.close_switch(1);
    h.run_for(300);
    assert!(h.hw.is_on(1));
    assert_eq!(h.sink.discarded("manual event (link down)"), vec![Severity::High]);
    assert!(h.sink.events.iter().any(|e| matches!(
        e,
        AppEvent::ManualSwitch {
            channel_id: 1,
            reported: false,
            ..
        }
    )));

    h.connect();
    assert!(h.link.frames_of("manual_switch").is_empty());
    let update = &h.link.frames_of("state_update")[0];
    assert_eq!(update["switches"][1]["state"], true);
    assert_eq!(update["switches"][1]["manualOverride"], true);

    h.step(30_000);
    let beat = &h.link.frames_of("heartbeat")[0];
    assert_eq!(beat["offline_mode"], true);
    assert_eq!(beat["nodeId"], "RN-TEST01");
}

#[test]
fn coordinator_channel_state_is_advisory_only() {
    let mut h = Harness::new();
    h.link.up = true;
    h.tick();
    h.link
        .inject(r#"{"type":"identified","switches":[{"channelId":0,"state":true}]}"#);
    h.tick();
    assert!(!h.hw.is_on(0));

    h.link.clear_sent();
    h.link
        .inject(r#"{"type":"config_update","switches":[{"channelId":0,"state":true}]}"#);
    h.tick();
    h.step(200);
    assert!(!h.hw.is_on(0));
    assert_eq!(h.link.frames_of("state_update").len(), 1);
    assert_eq!(
        h.sink.discarded("config_update channel states"),
        vec![Severity::Low]
    );

    // Pure metadata is accepted without complaint.
    h.link.inject(r#"{"type":"config_update","room":"B12"}"#);
    h.step(200);
    assert_eq!(h.link.frames_of("state_update").len(), 2);
    assert_eq!(h.sink.discarded("config_update channel states").len(), 1);
}

#[test]
fn commands_before_identified_are_dropped() {
    let mut h = Harness::new();
    h.link.up = true;
    h.tick();
    h.link.command(0, true);
    h.step(100);
    assert!(h.link.frames_of("switch_ack").is_empty());
    assert!(!h.hw.is_on(0));
}

#[test]
fn silent_coordinator_drops_the_link() {
    let mut h = Harness::new();
    h.connect();
    h.step(90_000);
    assert_eq!(h.service.link().state(), LinkState::Disconnected);
}

// ── Queue, rate limit, directives ─────────────────────────────

#[test]
fn queue_overflow_rejects_newest() {
    let mut h = Harness::new();
    h.connect();
    for i in 0..33u8 {
        h.link.command(i % 8, true);
    }
    h.tick();
    h.tick();
    h.tick();

    let reasons = acks(&h);
    assert_eq!(reasons.iter().filter(|r| *r == "queued").count(), 32);
    assert_eq!(reasons.last().map(String::as_str), Some("queue_full"));
    assert_eq!(h.service.queue().overflow_count(), 1);
    assert_eq!(
        h.sink.discarded("remote command (queue full)"),
        vec![Severity::Medium]
    );

    h.step(100);
    assert!(h.service.queue().is_empty());
    assert!((0..8).all(|ch| h.hw.is_on(ch)));
}

#[test]
fn burst_beyond_limit_is_rate_limited() {
    let mut h = Harness::build(NodeConfig::default(), MemStore::new(), ManualClock::new(), 2);
    h.connect();
    h.link.command(0, true);
    h.link.command(1, true);
    h.link.command(2, true);
    h.tick();
    assert_eq!(acks(&h), vec!["queued", "queued", "rate_limited"]);
}

#[test]
fn unknown_channel_is_rejected() {
    let mut h = Harness::new();
    h.connect();
    h.link.command(9, true);
    h.tick();
    assert_eq!(acks(&h), vec!["unknown_channel"]);
}

#[test]
fn switch_edge_survives_a_failed_relay_write() {
    let mut h = Harness::new();
    h.connect();
    h.link.clear_sent();
    h.tick();

    h.hw.fail_writes = true;
    h.hw.close_switch(2);
    h.run_for(300);
    assert!(!h.hw.is_on(2));
    assert!(h.link.frames_of("manual_switch").is_empty());

    h.hw.fail_writes = false;
    h.step(10);
    assert!(h.hw.is_on(2));
    assert!(h.service.channels().get(2).unwrap().manual_override);
    let manual = h.link.frames_of("manual_switch");
    assert_eq!(manual.len(), 1);
    assert_eq!(manual[0]["newState"], true);
}

#[test]
fn relay_write_failure_is_reported() {
    let mut h = Harness::new();
    h.connect();
    h.hw.fail_writes = true;
    h.link.command(0, true);
    h.step(100);
    assert!(!h.service.channels().get(0).unwrap().output_state);
    assert!(h.sink.events.iter().any(|e| matches!(e, AppEvent::Error { .. })));
}

#[test]
fn directives_are_acknowledged() {
    let mut h = Harness::new();
    h.connect();

    h.link.inject(r#"{"type":"get_states"}"#);
    h.tick();
    let states = &h.link.frames_of("get_states_ack")[0];
    assert_eq!(states["switches"].as_array().map(Vec::len), Some(8));

    h.link.inject(r#"{"type":"save_states"}"#);
    h.tick();
    assert!(h.store.has_snapshot());
    assert_eq!(h.link.frames_of("save_states_ack")[0]["ok"], true);

    h.link.inject(r#"{"type":"clear_states"}"#);
    h.tick();
    assert!(!h.store.has_snapshot());
    assert_eq!(h.link.frames_of("clear_states_ack")[0]["ok"], true);

    h.store.fail = true;
    h.link.inject(r#"{"type":"save_states"}"#);
    h.tick();
    assert_eq!(h.link.frames_of("save_states_ack")[1]["ok"], false);
    assert!(h.sink.high_severity_count() >= 1);
}

#[test]
fn restart_saves_then_acks_then_reports() {
    let mut h = Harness::new();
    h.connect();
    h.link.inject(r#"{"type":"restart"}"#);
    let report = h.tick();
    assert!(report.restart_requested);
    assert!(h.store.has_snapshot());
    assert_eq!(h.link.frames_of("restart_ack")[0]["ok"], true);
}
