mod common;

use chrono::Duration;
use common::{harness, harness_in, snapshot, t0, Behaviour, Harness, IndicatorCall, RecordingChannel};
use std::sync::atomic::Ordering;
use tempmon_alert::{Comparator, Rule};
use tempmon_common::types::{Severity, Transition};
use tempmon_notify::SendOutcome;
use tempmon_storage::AlertStateStore;
use tempmon_worker::config::WorkerConfig;

fn temp_rule() -> Rule {
    Rule::new(
        "temp",
        Comparator::GreaterThan,
        40.0,
        38.0,
        Severity::High,
        "Temperature too high",
    )
}

fn cycles_rule() -> Rule {
    Rule::new(
        "cycles",
        Comparator::GreaterThan,
        50.0,
        45.0,
        Severity::Info,
        "Cycle rate high",
    )
}

fn level_rule() -> Rule {
    Rule::new(
        "level",
        Comparator::LessThan,
        20.0,
        25.0,
        Severity::High,
        "Oil level too low",
    )
}

#[tokio::test]
async fn open_then_clear_over_three_cycles() {
    let phone = RecordingChannel::new("phone", Behaviour::Succeed);
    let h = harness(vec![temp_rule()], &[(phone.clone(), Severity::Info)], 120);

    for (i, v) in [41.0, 39.0, 37.0].into_iter().enumerate() {
        let at = t0() + Duration::seconds(10 * i as i64);
        h.source.push(Some(snapshot(at, &[("temp", Some(v))])));
    }

    let first = h.coordinator.run_cycle_at(t0()).await.unwrap();
    assert_eq!(first.transitions, vec![("temp".to_string(), Transition::Opened)]);
    assert_eq!(first.alarm_on, Some(true));
    assert_eq!(h.indicator.chimes(), 1);

    let second = h
        .coordinator
        .run_cycle_at(t0() + Duration::seconds(10))
        .await
        .unwrap();
    assert!(second.transitions.is_empty());
    assert_eq!(second.alarm_on, Some(true));

    let third = h
        .coordinator
        .run_cycle_at(t0() + Duration::seconds(20))
        .await
        .unwrap();
    assert_eq!(third.transitions, vec![("temp".to_string(), Transition::Cleared)]);
    assert_eq!(third.alarm_on, Some(false));
    assert_eq!(h.indicator.alarm_level(), Some(false));

    let events = h.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].transition, Transition::Opened);
    assert_eq!(events[0].threshold, 40.0);
    assert_eq!(events[0].message, "Temperature too high: 41.00");
    assert_eq!(events[1].transition, Transition::Cleared);
    assert_eq!(events[1].threshold, 38.0);
    assert_eq!(events[1].message, "Temperature too high resolved: 37.00");

    let sent = phone.received();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].title, "pi5-001 • Temperature too high");
    assert_eq!(sent[1].transition, Transition::Cleared);
    assert!(!h.store.get_state("temp").unwrap().active);
}

#[tokio::test]
async fn reopen_within_cooldown_records_but_does_not_notify() {
    let phone = RecordingChannel::new("phone", Behaviour::Succeed);
    let h = harness(vec![temp_rule()], &[(phone.clone(), Severity::Info)], 120);

    for (secs, v) in [(0, 41.0), (20, 37.0), (40, 41.5)] {
        let at = t0() + Duration::seconds(secs);
        h.source.push(Some(snapshot(at, &[("temp", Some(v))])));
        h.coordinator.run_cycle_at(at).await.unwrap();
    }

    let opened: Vec<_> = h
        .events()
        .into_iter()
        .filter(|e| e.transition == Transition::Opened)
        .collect();
    assert_eq!(opened.len(), 2);

    let sent = phone.received();
    let sent_opens = sent
        .iter()
        .filter(|r| r.transition == Transition::Opened)
        .count();
    assert_eq!(sent_opens, 1);
    assert_eq!(sent.len(), 2, "the clear notification is never gated");

    let state = h.store.get_state("temp").unwrap();
    assert!(state.active);
    assert_eq!(state.last_notified_at, t0());
    // The local alarm is not subject to the cooldown
    assert_eq!(h.indicator.chimes(), 2);
}

#[tokio::test]
async fn null_and_missing_values_change_nothing() {
    let phone = RecordingChannel::new("phone", Behaviour::Succeed);
    let h = harness(
        vec![temp_rule(), level_rule()],
        &[(phone.clone(), Severity::Info)],
        120,
    );

    h.source
        .push(Some(snapshot(t0(), &[("temp", None), ("level", Some(f64::NAN))])));
    let report = h.coordinator.run_cycle_at(t0()).await.unwrap();

    assert_eq!(report.evaluated, 2);
    assert!(report.transitions.is_empty());
    assert!(h.events().is_empty());
    assert!(h.store.list_states().unwrap().is_empty());
    assert!(phone.received().is_empty());
    assert_eq!(report.alarm_on, Some(false));
}

#[tokio::test]
async fn no_snapshot_skips_the_whole_cycle() {
    let h = harness(vec![temp_rule()], &[], 120);
    h.source.push(None);

    let report = h.coordinator.run_cycle_at(t0()).await.unwrap();

    assert!(report.skipped());
    assert_eq!(report.evaluated, 0);
    assert_eq!(report.alarm_on, None);
    assert!(h.indicator.calls().is_empty());
}

#[tokio::test]
async fn dead_zone_keeps_alert_active_without_effects() {
    let phone = RecordingChannel::new("phone", Behaviour::Succeed);
    let h = harness(vec![temp_rule()], &[(phone.clone(), Severity::Info)], 120);

    h.source.push(Some(snapshot(t0(), &[("temp", Some(42.0))])));
    h.coordinator.run_cycle_at(t0()).await.unwrap();
    h.indicator.take_calls();

    let at = t0() + Duration::seconds(10);
    h.source.push(Some(snapshot(at, &[("temp", Some(39.0))])));
    let report = h.coordinator.run_cycle_at(at).await.unwrap();

    assert!(report.transitions.is_empty());
    assert!(report.deliveries.is_empty());
    assert!(h.store.get_state("temp").unwrap().active);
    assert_eq!(phone.received().len(), 1);
    assert_eq!(
        h.indicator.calls(),
        vec![IndicatorCall::SetAlarm(true), IndicatorCall::Silence]
    );
}

#[tokio::test]
async fn failing_and_hanging_channels_do_not_block_others() {
    let hanging = RecordingChannel::new("hanging", Behaviour::Hang);
    let failing = RecordingChannel::new("failing", Behaviour::Fail);
    let phone = RecordingChannel::new("phone", Behaviour::Succeed);
    let h = harness(
        vec![temp_rule()],
        &[
            (hanging.clone(), Severity::Info),
            (failing.clone(), Severity::Info),
            (phone.clone(), Severity::Info),
        ],
        120,
    );

    h.source.push(Some(snapshot(t0(), &[("temp", Some(45.0))])));
    let started = std::time::Instant::now();
    let report = h.coordinator.run_cycle_at(t0()).await.unwrap();

    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(phone.received().len(), 1);
    assert_eq!(failing.received().len(), 1);
    assert_eq!(report.deliveries.len(), 3);
    assert_eq!(report.delivered(), 1);
    let outcome = |name: &str| {
        report
            .deliveries
            .iter()
            .find(|d| d.channel == name)
            .map(|d| d.outcome.clone())
            .unwrap()
    };
    assert_eq!(outcome("phone"), SendOutcome::Delivered);
    assert!(matches!(outcome("failing"), SendOutcome::TransientFailure(_)));
    assert!(matches!(outcome("hanging"), SendOutcome::TransientFailure(r) if r.contains("timed out")));

    // Channel failures never roll back the committed transition
    assert!(h.store.get_state("temp").unwrap().active);
    assert_eq!(h.events().len(), 1);
}

#[tokio::test]
async fn simultaneous_transitions_wait_for_one_channel_timeout() {
    let hanging = RecordingChannel::new("hanging", Behaviour::Hang);
    let current_rule = Rule::new(
        "current",
        Comparator::GreaterThan,
        25.0,
        22.0,
        Severity::Medium,
        "Over current",
    );
    let h = harness(
        vec![temp_rule(), level_rule(), cycles_rule(), current_rule],
        &[(hanging.clone(), Severity::Info)],
        120,
    );

    h.source.push(Some(snapshot(
        t0(),
        &[
            ("temp", Some(41.0)),
            ("level", Some(10.0)),
            ("cycles", Some(60.0)),
            ("current", Some(30.0)),
        ],
    )));
    let started = std::time::Instant::now();
    let report = h.coordinator.run_cycle_at(t0()).await.unwrap();
    let elapsed = started.elapsed();

    // One channel call is bounded by 50ms + 500ms grace
    assert!(
        elapsed < std::time::Duration::from_millis(1500),
        "cycle took {elapsed:?}"
    );
    assert_eq!(report.transitions.len(), 4);
    assert_eq!(report.deliveries.len(), 4);
    assert_eq!(hanging.received().len(), 4);
    assert_eq!(h.indicator.chimes(), 1);
    assert_eq!(h.events().len(), 4);
    assert!(h.events().iter().all(|e| !e.id.is_empty()));
}

#[tokio::test]
async fn aggregate_indicator_follows_alarm_severity_rules_only() {
    let h = harness(vec![temp_rule(), cycles_rule(), level_rule()], &[], 120);

    h.source.push(Some(snapshot(
        t0(),
        &[("temp", Some(41.0)), ("cycles", Some(60.0)), ("level", Some(50.0))],
    )));
    let first = h.coordinator.run_cycle_at(t0()).await.unwrap();
    assert_eq!(first.transitions.len(), 2);
    assert_eq!(first.alarm_on, Some(true));
    assert_eq!(h.indicator.chimes(), 1, "info-severity rules never chime");

    // High rule clears while the info rule stays active: LED goes off now
    let at = t0() + Duration::seconds(10);
    h.source.push(Some(snapshot(
        at,
        &[("temp", Some(37.0)), ("cycles", Some(60.0)), ("level", Some(50.0))],
    )));
    let second = h.coordinator.run_cycle_at(at).await.unwrap();
    assert_eq!(second.alarm_on, Some(false));
    assert_eq!(h.indicator.alarm_level(), Some(false));
    assert!(h.store.get_state("cycles").unwrap().active);
    assert_eq!(h.indicator.calls().last(), Some(&IndicatorCall::Silence));
}

#[tokio::test]
async fn broken_indicator_is_logged_and_ignored() {
    let phone = RecordingChannel::new("phone", Behaviour::Succeed);
    let h = harness(vec![temp_rule()], &[(phone.clone(), Severity::Info)], 120);
    h.indicator.broken.store(true, Ordering::SeqCst);

    h.source.push(Some(snapshot(t0(), &[("temp", Some(41.0))])));
    let report = h.coordinator.run_cycle_at(t0()).await.unwrap();

    assert_eq!(report.transitions.len(), 1);
    assert_eq!(phone.received().len(), 1);
    assert!(h.store.get_state("temp").unwrap().active);
}

#[tokio::test]
async fn persistence_failure_blocks_effects_until_next_cycle() {
    let phone = RecordingChannel::new("phone", Behaviour::Succeed);
    let h = harness(vec![temp_rule()], &[(phone.clone(), Severity::Info)], 120);

    h.store.fail_commits.store(true, Ordering::SeqCst);
    h.source.push(Some(snapshot(t0(), &[("temp", Some(41.0))])));
    let report = h.coordinator.run_cycle_at(t0()).await.unwrap();

    assert_eq!(report.failed_rules, vec!["temp".to_string()]);
    assert!(report.transitions.is_empty());
    assert!(phone.received().is_empty());
    assert_eq!(h.indicator.chimes(), 0);
    assert_eq!(report.alarm_on, Some(false));
    assert!(h.events().is_empty());

    h.store.fail_commits.store(false, Ordering::SeqCst);
    let at = t0() + Duration::seconds(10);
    h.source.push(Some(snapshot(at, &[("temp", Some(41.0))])));
    let report = h.coordinator.run_cycle_at(at).await.unwrap();
    assert_eq!(report.transitions, vec![("temp".to_string(), Transition::Opened)]);
    assert_eq!(phone.received().len(), 1);

    // A failed clear keeps the durable ACTIVE state and the LED on
    h.store.fail_commits.store(true, Ordering::SeqCst);
    let at = t0() + Duration::seconds(20);
    h.source.push(Some(snapshot(at, &[("temp", Some(36.0))])));
    let report = h.coordinator.run_cycle_at(at).await.unwrap();
    assert_eq!(report.alarm_on, Some(true));
    assert_eq!(phone.received().len(), 1);
    assert!(h.store.get_state("temp").unwrap().active);
}

#[tokio::test]
async fn rules_sharing_a_metric_keep_separate_state() {
    let warn = Rule::new(
        "temp",
        Comparator::GreaterThan,
        35.0,
        33.0,
        Severity::Medium,
        "Temperature rising",
    )
    .with_id("temp-warn");
    let high = temp_rule().with_id("temp-high");
    let h = harness(vec![warn, high], &[], 120);

    for (secs, v) in [(0, 36.0), (10, 41.0), (20, 37.0)] {
        let at = t0() + Duration::seconds(secs);
        h.source.push(Some(snapshot(at, &[("temp", Some(v))])));
        h.coordinator.run_cycle_at(at).await.unwrap();
    }

    let keys: Vec<(String, Transition)> = h
        .events()
        .into_iter()
        .map(|e| (e.rule_id, e.transition))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("temp-warn".to_string(), Transition::Opened),
            ("temp-high".to_string(), Transition::Opened),
            ("temp-high".to_string(), Transition::Cleared),
        ]
    );
    assert!(h.store.get_state("temp-warn").unwrap().active);
    assert_eq!(h.indicator.alarm_level(), Some(false));
}

#[tokio::test]
async fn active_state_survives_restart() {
    let phone = RecordingChannel::new("phone", Behaviour::Succeed);
    let h = harness(vec![temp_rule()], &[(phone.clone(), Severity::Info)], 120);
    h.source.push(Some(snapshot(t0(), &[("temp", Some(41.0))])));
    h.coordinator.run_cycle_at(t0()).await.unwrap();

    let Harness { dir, .. } = h;
    let h = harness_in(dir, vec![temp_rule()], &[(phone.clone(), Severity::Info)], 120);
    let at = t0() + Duration::seconds(600);
    h.source.push(Some(snapshot(at, &[("temp", Some(43.0))])));
    let report = h.coordinator.run_cycle_at(at).await.unwrap();

    assert!(report.transitions.is_empty());
    assert_eq!(phone.received().len(), 1);
    assert_eq!(report.alarm_on, Some(true));
}

#[tokio::test]
async fn configured_worker_reads_latest_sqlite_row() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("tempmon.sqlite");
    {
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE readings (ts_ms INTEGER, temp REAL, level REAL, cycles INTEGER);
             INSERT INTO readings VALUES (1772352000000, 30.0, 50.0, 2);
             INSERT INTO readings VALUES (1772352010000, 41.25, 15.0, 3);",
        )
        .unwrap();
    }

    let config = WorkerConfig::parse(&format!(
        r#"
        device_id = "press-7"

        [storage]
        path = "{}"

        [indicator]
        kind = "none"
        "#,
        db.display()
    ))
    .unwrap();
    let coordinator = tempmon_worker::build_coordinator(&config).unwrap();
    let report = coordinator.run_cycle_at(t0()).await.unwrap();

    // Built-in rules: temp and level open, current has no column
    assert_eq!(report.evaluated, 4);
    let mut opened: Vec<String> = report.transitions.into_iter().map(|(k, _)| k).collect();
    opened.sort();
    assert_eq!(opened, vec!["level", "temp"]);
    assert_eq!(report.alarm_on, Some(true));

    let store = config.open_store().unwrap();
    let events = store.recent_events(10).unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.device_id == "press-7"));
}
