use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tempmon_alert::{AlertEngine, Evaluation};
use tempmon_common::id;
use tempmon_common::types::{AlertEvent, Transition};
use tempmon_notify::indicator::LocalIndicator;
use tempmon_notify::manager::{DeliveryReport, NotificationManager};
use tempmon_storage::{AlertStateStore, MetricSource};

/// What one evaluation cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Timestamp of the evaluated snapshot. `None` when the source had no
    /// data and the cycle was skipped.
    pub observed_at: Option<DateTime<Utc>>,
    pub evaluated: usize,
    /// `(rule key, transition)` for every committed transition.
    pub transitions: Vec<(String, Transition)>,
    /// Rule keys whose state could not be read or committed this cycle.
    pub failed_rules: Vec<String>,
    pub deliveries: Vec<DeliveryReport>,
    /// Aggregate indicator level applied at the end of the cycle.
    pub alarm_on: Option<bool>,
}

impl CycleReport {
    pub fn skipped(&self) -> bool {
        self.observed_at.is_none()
    }

    /// Number of channel calls the remote side accepted.
    pub fn delivered(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.outcome.is_delivered())
            .count()
    }
}

/// Runs evaluation cycles: snapshot in, durable state and events, then
/// outward notifications and the local indicator.
///
/// Every rule is evaluated and committed first; only then do the effects of
/// the committed transitions run, all at once. A crash can at worst repeat a
/// notification but never lose a transition, and a slow channel holds up
/// neither other rules' state nor more than one channel timeout per cycle. Cycles
/// must not overlap; callers run them one after another.
pub struct DispatchCoordinator {
    engine: AlertEngine,
    store: Arc<dyn AlertStateStore>,
    source: Arc<dyn MetricSource>,
    notifier: NotificationManager,
    indicator: Arc<dyn LocalIndicator>,
}

impl DispatchCoordinator {
    pub fn new(
        engine: AlertEngine,
        store: Arc<dyn AlertStateStore>,
        source: Arc<dyn MetricSource>,
        notifier: NotificationManager,
        indicator: Arc<dyn LocalIndicator>,
    ) -> Self {
        Self {
            engine,
            store,
            source,
            notifier,
            indicator,
        }
    }

    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Runs one cycle with `now` as the wall-clock time for cooldowns.
    ///
    /// Only a metric source failure is returned as an error. Storage,
    /// channel and indicator failures are logged and reported per rule.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        let snapshot = self
            .source
            .get_latest()
            .await
            .with_context(|| format!("Failed to read metrics from {}", self.source.describe()))?;
        let Some(snapshot) = snapshot else {
            tracing::debug!("No metric snapshot available, skipping cycle");
            return Ok(CycleReport::default());
        };

        let mut report = CycleReport {
            observed_at: Some(snapshot.observed_at),
            ..CycleReport::default()
        };
        let mut alarm_on = false;
        let mut committed: Vec<Evaluation> = Vec::new();

        for rule in self.engine.rules() {
            let key = rule.key();
            let drives_alarm = self.engine.drives_local_alarm(rule);
            report.evaluated += 1;

            let state = match self.store.get_state(key) {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!(rule = %key, error = %e, "Failed to load alert state");
                    report.failed_rules.push(key.to_string());
                    continue;
                }
            };

            let evaluation = self.engine.evaluate(rule, &snapshot, state, now);
            if evaluation.is_noop() {
                alarm_on |= drives_alarm && state.active;
                continue;
            }

            let event = evaluation.event().map(|event| AlertEvent {
                id: id::next_id(),
                ..event.clone()
            });
            if let Err(e) = self.store.commit(key, &evaluation.next, event.as_ref()) {
                // Nothing goes out without a durable record; retried next cycle
                tracing::error!(rule = %key, error = %e, "Failed to persist alert state");
                report.failed_rules.push(key.to_string());
                alarm_on |= drives_alarm && state.active;
                continue;
            }

            if let Some(event) = &event {
                tracing::info!(
                    rule = %key,
                    event_id = %event.id,
                    metric = %event.metric,
                    value = event.value,
                    threshold = event.threshold,
                    severity = %event.severity,
                    transition = %event.transition,
                    "Alert {}",
                    event.transition
                );
                report.transitions.push((key.to_string(), event.transition));
            }
            alarm_on |= drives_alarm && evaluation.next.active;
            committed.push(evaluation);
        }

        report.deliveries = self.run_effects(&committed).await;
        self.apply_indicator(alarm_on).await;
        report.alarm_on = Some(alarm_on);
        Ok(report)
    }

    /// Carries out the outward effects of every evaluation committed this
    /// cycle. All notifications go out together, so the cycle waits for at
    /// most one channel timeout however many rules transitioned. The chime
    /// plays once while the channels are being called.
    async fn run_effects(&self, committed: &[Evaluation]) -> Vec<DeliveryReport> {
        let notify = join_all(
            committed
                .iter()
                .filter_map(Evaluation::notification)
                .map(|request| self.notifier.dispatch(request)),
        );
        let alarm = async {
            if committed.iter().any(Evaluation::sounds_alarm) {
                self.sound_alarm().await;
            }
        };
        let (deliveries, ()) = tokio::join!(notify, alarm);
        deliveries.into_iter().flatten().collect()
    }

    async fn sound_alarm(&self) {
        let indicator = Arc::clone(&self.indicator);
        let result = tokio::task::spawn_blocking(move || {
            indicator.set_alarm(true)?;
            indicator.chime()
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Local alarm chime failed"),
            Err(e) => tracing::warn!(error = %e, "Local alarm task failed"),
        }
    }

    /// Drives the LED to the aggregate alarm level and makes sure the buzzer
    /// is off before the next cycle.
    async fn apply_indicator(&self, alarm_on: bool) {
        let indicator = Arc::clone(&self.indicator);
        let result = tokio::task::spawn_blocking(move || {
            let led = indicator.set_alarm(alarm_on);
            let buzzer = indicator.silence();
            led.and(buzzer)
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(alarm = alarm_on, error = %e, "Local indicator update failed"),
            Err(e) => tracing::warn!(error = %e, "Local indicator task failed"),
        }
    }
}
