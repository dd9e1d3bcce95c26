use crate::rules::{Rule, RuleSet};
use chrono::{DateTime, Duration, Utc};
use tempmon_common::types::{
    AlertEvent, AlertState, ChannelMatrix, MetricSnapshot, NotificationRequest, Severity,
    Transition,
};

/// A side effect requested by [`evaluate`]. The dispatch layer carries them
/// out in order, after the new state has been committed.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append this event to the alert history.
    Record(AlertEvent),
    /// Send this request to its routed channels.
    Notify(NotificationRequest),
    /// Light the local indicator and sound the buzzer chime.
    SoundAlarm,
}

/// Outcome of evaluating one rule against one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub rule_id: String,
    pub previous: AlertState,
    pub next: AlertState,
    pub effects: Vec<Effect>,
}

impl Evaluation {
    fn unchanged(rule: &Rule, state: AlertState) -> Self {
        Self {
            rule_id: rule.key().to_string(),
            previous: state,
            next: state,
            effects: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.effects.is_empty() && self.previous == self.next
    }

    pub fn transition(&self) -> Option<Transition> {
        self.event().map(|e| e.transition)
    }

    pub fn event(&self) -> Option<&AlertEvent> {
        self.effects.iter().find_map(|e| match e {
            Effect::Record(event) => Some(event),
            _ => None,
        })
    }

    pub fn notification(&self) -> Option<&NotificationRequest> {
        self.effects.iter().find_map(|e| match e {
            Effect::Notify(req) => Some(req),
            _ => None,
        })
    }

    pub fn sounds_alarm(&self) -> bool {
        self.effects.iter().any(|e| matches!(e, Effect::SoundAlarm))
    }
}

/// Everything the evaluator needs besides the rule, the value and the state.
pub struct EvalContext<'a> {
    /// Wall-clock time of this cycle, used for the cooldown gate.
    pub now: DateTime<Utc>,
    /// Snapshot time, stamped on recorded events.
    pub observed_at: DateTime<Utc>,
    pub device_id: &'a str,
    pub cooldown: Duration,
    pub local_alarm_severity: Severity,
    pub channels: &'a ChannelMatrix,
}

/// Decides the next state of one rule.
///
/// `value` is the rule metric's reading from the current snapshot; `None`
/// (or NaN) means no reading and leaves the state untouched.
pub fn evaluate(
    rule: &Rule,
    value: Option<f64>,
    state: AlertState,
    ctx: &EvalContext<'_>,
) -> Evaluation {
    let Some(value) = value.filter(|v| !v.is_nan()) else {
        return Evaluation::unchanged(rule, state);
    };

    match (rule.is_violating(value), state.active) {
        (true, false) => open(rule, value, state, ctx),
        (false, true) if rule.is_cleared(value) => clear(rule, value, state, ctx),
        // Still violating, inside the dead zone, or idle.
        _ => Evaluation::unchanged(rule, state),
    }
}

fn open(rule: &Rule, value: f64, state: AlertState, ctx: &EvalContext<'_>) -> Evaluation {
    let message = rule.render_message(ctx.device_id);
    let mut next = AlertState {
        active: true,
        ..state
    };
    let mut effects = vec![Effect::Record(make_event(
        rule,
        value,
        rule.open_threshold,
        Transition::Opened,
        format!("{message}: {value:.2}"),
        ctx,
    ))];

    if rule.severity >= ctx.local_alarm_severity {
        effects.push(Effect::SoundAlarm);
    }

    let channels = ctx.channels.channels_for(rule.severity);
    if !channels.is_empty() {
        let cooldown = rule
            .cooldown_secs
            .map(|secs| Duration::seconds(secs.min(u64::from(u32::MAX)) as i64))
            .unwrap_or(ctx.cooldown);
        let since_last = ctx.now - state.last_notified_at;

        // A clock that stepped backwards must not mute the channels
        if since_last >= cooldown || since_last < Duration::zero() {
            next.last_notified_at = ctx.now;
            effects.push(Effect::Notify(NotificationRequest {
                title: format!("{} • {}", ctx.device_id, message),
                body: format!(
                    "{}: {:.2} ({}{:.2})",
                    rule.metric, value, rule.comparator, rule.open_threshold
                ),
                severity: rule.severity,
                transition: Transition::Opened,
                metric: rule.metric.clone(),
                value,
                device_id: ctx.device_id.to_string(),
                channels,
            }));
        } else {
            tracing::debug!(
                rule_id = rule.key(),
                since_last_secs = since_last.num_seconds(),
                cooldown_secs = cooldown.num_seconds(),
                "Notification suppressed (cooldown)"
            );
        }
    }

    Evaluation {
        rule_id: rule.key().to_string(),
        previous: state,
        next,
        effects,
    }
}

fn clear(rule: &Rule, value: f64, state: AlertState, ctx: &EvalContext<'_>) -> Evaluation {
    let message = rule.render_message(ctx.device_id);
    let next = AlertState {
        active: false,
        ..state
    };
    let mut effects = vec![Effect::Record(make_event(
        rule,
        value,
        rule.clear_threshold,
        Transition::Cleared,
        format!("{message} resolved: {value:.2}"),
        ctx,
    ))];

    let channels = ctx.channels.channels_for(rule.severity);
    if !channels.is_empty() {
        effects.push(Effect::Notify(NotificationRequest {
            title: format!("{} • {} resolved", ctx.device_id, message),
            body: format!(
                "{}: {:.2} ({}{:.2})",
                rule.metric,
                value,
                rule.comparator.opposite(),
                rule.clear_threshold
            ),
            severity: rule.severity,
            transition: Transition::Cleared,
            metric: rule.metric.clone(),
            value,
            device_id: ctx.device_id.to_string(),
            channels,
        }));
    }

    Evaluation {
        rule_id: rule.key().to_string(),
        previous: state,
        next,
        effects,
    }
}

fn make_event(
    rule: &Rule,
    value: f64,
    threshold: f64,
    transition: Transition,
    message: String,
    ctx: &EvalContext<'_>,
) -> AlertEvent {
    AlertEvent {
        id: String::new(),
        rule_id: rule.key().to_string(),
        observed_at: ctx.observed_at,
        metric: rule.metric.clone(),
        value,
        threshold,
        severity: rule.severity,
        transition,
        message,
        device_id: ctx.device_id.to_string(),
    }
}

/// Engine-wide evaluation parameters, fixed for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub device_id: String,
    pub cooldown: Duration,
    pub local_alarm_severity: Severity,
    pub channels: ChannelMatrix,
}

/// Holds the rule table and settings, and evaluates rules one at a time.
pub struct AlertEngine {
    rules: RuleSet,
    settings: EngineSettings,
}

impl AlertEngine {
    pub fn new(rules: RuleSet, settings: EngineSettings) -> Self {
        Self { rules, settings }
    }

    pub fn rules(&self) -> &[Rule] {
        self.rules.rules()
    }

    pub fn evaluate(
        &self,
        rule: &Rule,
        snapshot: &MetricSnapshot,
        state: AlertState,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let ctx = EvalContext {
            now,
            observed_at: snapshot.observed_at,
            device_id: &self.settings.device_id,
            cooldown: self.settings.cooldown,
            local_alarm_severity: self.settings.local_alarm_severity,
            channels: &self.settings.channels,
        };
        evaluate(rule, snapshot.value(&rule.metric), state, &ctx)
    }

    /// True when `rule` counts towards the aggregate local alarm.
    pub fn drives_local_alarm(&self, rule: &Rule) -> bool {
        rule.severity >= self.settings.local_alarm_severity
    }
}
