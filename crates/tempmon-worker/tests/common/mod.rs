#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tempmon_alert::{AlertEngine, EngineSettings, Rule, RuleSet};
use tempmon_common::types::{AlertEvent, AlertState, MetricSnapshot, NotificationRequest, Severity};
use tempmon_notify::error::{NotifyError, Result as NotifyResult};
use tempmon_notify::indicator::LocalIndicator;
use tempmon_notify::manager::NotificationManager;
use tempmon_notify::routing::{build_matrix, ChannelRoute};
use tempmon_notify::{NotificationChannel, SendOutcome};
use tempmon_storage::error::{Result as StorageResult, StorageError};
use tempmon_storage::state_store::SqliteAlertStore;
use tempmon_storage::{AlertStateStore, MetricSource};
use tempmon_worker::coordinator::DispatchCoordinator;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

pub fn snapshot(at: DateTime<Utc>, values: &[(&str, Option<f64>)]) -> MetricSnapshot {
    values
        .iter()
        .fold(MetricSnapshot::new(at), |snap, (metric, value)| {
            snap.with_value(metric, *value)
        })
}

/// Hands out queued snapshots one per cycle, then reports no data.
#[derive(Default)]
pub struct ScriptedSource {
    queue: Mutex<VecDeque<Option<MetricSnapshot>>>,
}

impl ScriptedSource {
    pub fn push(&self, snapshot: Option<MetricSnapshot>) {
        self.queue.lock().unwrap().push_back(snapshot);
    }
}

#[async_trait]
impl MetricSource for ScriptedSource {
    async fn get_latest(&self) -> StorageResult<Option<MetricSnapshot>> {
        Ok(self.queue.lock().unwrap().pop_front().flatten())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[derive(Clone, Copy)]
pub enum Behaviour {
    Succeed,
    Fail,
    Hang,
}

pub struct RecordingChannel {
    name: String,
    behaviour: Behaviour,
    pub requests: Mutex<Vec<NotificationRequest>>,
}

impl RecordingChannel {
    pub fn new(name: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behaviour,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn received(&self) -> Vec<NotificationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, request: &NotificationRequest) -> SendOutcome {
        self.requests.lock().unwrap().push(request.clone());
        match self.behaviour {
            Behaviour::Succeed => SendOutcome::Delivered,
            Behaviour::Fail => SendOutcome::TransientFailure("HTTP 503".to_string()),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                SendOutcome::Delivered
            }
        }
    }

    fn channel_type(&self) -> &str {
        "recording"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(50)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorCall {
    SetAlarm(bool),
    Chime,
    Silence,
}

#[derive(Default)]
pub struct RecordingIndicator {
    calls: Mutex<Vec<IndicatorCall>>,
    pub broken: AtomicBool,
}

impl RecordingIndicator {
    pub fn calls(&self) -> Vec<IndicatorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<IndicatorCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Last LED level written, if any.
    pub fn alarm_level(&self) -> Option<bool> {
        self.calls().iter().rev().find_map(|c| match c {
            IndicatorCall::SetAlarm(on) => Some(*on),
            _ => None,
        })
    }

    pub fn chimes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == IndicatorCall::Chime)
            .count()
    }

    fn record(&self, call: IndicatorCall) -> NotifyResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.broken.load(Ordering::SeqCst) {
            return Err(NotifyError::Other("gpio write failed".to_string()));
        }
        Ok(())
    }
}

impl LocalIndicator for RecordingIndicator {
    fn set_alarm(&self, on: bool) -> NotifyResult<()> {
        self.record(IndicatorCall::SetAlarm(on))
    }

    fn chime(&self) -> NotifyResult<()> {
        self.record(IndicatorCall::Chime)
    }

    fn silence(&self) -> NotifyResult<()> {
        self.record(IndicatorCall::Silence)
    }

    fn kind(&self) -> &str {
        "recording"
    }
}

/// SQLite store whose commits can be made to fail on demand.
pub struct FlakyStore {
    pub inner: SqliteAlertStore,
    pub fail_commits: AtomicBool,
}

impl AlertStateStore for FlakyStore {
    fn get_state(&self, key: &str) -> StorageResult<AlertState> {
        self.inner.get_state(key)
    }

    fn commit(&self, key: &str, state: &AlertState, event: Option<&AlertEvent>) -> StorageResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::Source("database is locked".to_string()));
        }
        self.inner.commit(key, state, event)
    }

    fn recent_events(&self, limit: usize) -> StorageResult<Vec<AlertEvent>> {
        self.inner.recent_events(limit)
    }

    fn list_states(&self) -> StorageResult<Vec<(String, AlertState)>> {
        self.inner.list_states()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<FlakyStore>,
    pub source: Arc<ScriptedSource>,
    pub indicator: Arc<RecordingIndicator>,
    pub coordinator: DispatchCoordinator,
}

impl Harness {
    /// Events in insertion order.
    pub fn events(&self) -> Vec<AlertEvent> {
        let mut events = self.store.recent_events(100).unwrap();
        events.reverse();
        events
    }
}

/// Builds a coordinator over a fresh SQLite store. Each channel is routed
/// for its given minimum severity.
pub fn harness(
    rules: Vec<Rule>,
    channels: &[(Arc<RecordingChannel>, Severity)],
    cooldown_secs: i64,
) -> Harness {
    let dir = TempDir::new().unwrap();
    harness_in(dir, rules, channels, cooldown_secs)
}

pub fn harness_in(
    dir: TempDir,
    rules: Vec<Rule>,
    channels: &[(Arc<RecordingChannel>, Severity)],
    cooldown_secs: i64,
) -> Harness {
    let store = Arc::new(FlakyStore {
        inner: SqliteAlertStore::open(&dir.path().join("alerts.sqlite")).unwrap(),
        fail_commits: AtomicBool::new(false),
    });
    let source = Arc::new(ScriptedSource::default());
    let indicator = Arc::new(RecordingIndicator::default());

    let routes: Vec<ChannelRoute> = channels
        .iter()
        .map(|(ch, sev)| ChannelRoute {
            channel: ch.name().to_string(),
            min_severity: *sev,
        })
        .collect();
    let engine = AlertEngine::new(
        RuleSet::new(rules).unwrap(),
        EngineSettings {
            device_id: "pi5-001".to_string(),
            cooldown: chrono::Duration::seconds(cooldown_secs),
            local_alarm_severity: Severity::High,
            channels: build_matrix(&routes, Severity::Info),
        },
    );
    let notifier = NotificationManager::new(
        channels
            .iter()
            .map(|(ch, _)| Arc::clone(ch) as Arc<dyn NotificationChannel>)
            .collect(),
    );

    let coordinator = DispatchCoordinator::new(
        engine,
        Arc::clone(&store) as Arc<dyn AlertStateStore>,
        Arc::clone(&source) as Arc<dyn MetricSource>,
        notifier,
        Arc::clone(&indicator) as Arc<dyn LocalIndicator>,
    );
    Harness {
        dir,
        store,
        source,
        indicator,
        coordinator,
    }
}
