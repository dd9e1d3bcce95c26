use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use tempmon_common::types::Severity;
///
/// let sev: Severity = "medium".parse().unwrap();
/// assert_eq!(sev, Severity::Medium);
/// assert_eq!(sev.to_string(), "medium");
/// assert!(Severity::High > Severity::Info);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[serde(alias = "warn", alias = "warning")]
    Medium,
    #[serde(alias = "crit", alias = "critical")]
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "medium" | "warn" | "warning" => Ok(Severity::Medium),
            "high" | "crit" | "critical" => Ok(Severity::High),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The most recent reading of every sampled metric.
///
/// A metric mapped to `None` (or missing entirely) has no reading available
/// for this snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub observed_at: DateTime<Utc>,
    pub values: HashMap<String, Option<f64>>,
}

impl MetricSnapshot {
    pub fn new(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, metric: &str, value: Option<f64>) -> Self {
        self.values.insert(metric.to_string(), value);
        self
    }

    /// Returns the usable reading for `metric`.
    ///
    /// Missing metrics, explicit nulls and NaN all map to `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use tempmon_common::types::MetricSnapshot;
    ///
    /// let snap = MetricSnapshot::new(Utc::now())
    ///     .with_value("temp", Some(41.5))
    ///     .with_value("level", Some(f64::NAN))
    ///     .with_value("current", None);
    /// assert_eq!(snap.value("temp"), Some(41.5));
    /// assert_eq!(snap.value("level"), None);
    /// assert_eq!(snap.value("current"), None);
    /// assert_eq!(snap.value("cycles"), None);
    /// ```
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values
            .get(metric)
            .copied()
            .flatten()
            .filter(|v| !v.is_nan())
    }
}

/// Durable per-rule alert memory: is the metric currently in violation, and
/// when was an outward notification last attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    pub active: bool,
    pub last_notified_at: DateTime<Utc>,
}

impl Default for AlertState {
    fn default() -> Self {
        Self {
            active: false,
            last_notified_at: DateTime::UNIX_EPOCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Opened,
    Cleared,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Opened => write!(f, "opened"),
            Transition::Cleared => write!(f, "cleared"),
        }
    }
}

impl std::str::FromStr for Transition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" | "open" => Ok(Transition::Opened),
            "cleared" => Ok(Transition::Cleared),
            _ => Err(format!("unknown transition: {s}")),
        }
    }
}

/// One row of the append-only alert history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Assigned when the event is committed; empty on a fresh evaluation.
    pub id: String,
    /// Key of the rule that produced the transition (the metric name unless
    /// the rule carries an explicit id).
    pub rule_id: String,
    pub observed_at: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
    /// Open threshold for `opened` events, clear threshold for `cleared`.
    pub threshold: f64,
    pub severity: Severity,
    pub transition: Transition,
    pub message: String,
    pub device_id: String,
}

/// An outward notification built for a single transition. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub transition: Transition,
    pub metric: String,
    pub value: f64,
    pub device_id: String,
    /// Names of the configured channels this request is routed to.
    pub channels: BTreeSet<String>,
}

/// Explicit severity-to-channel routing: which configured channels receive
/// notifications of a given severity.
///
/// # Examples
///
/// ```
/// use tempmon_common::types::{ChannelMatrix, Severity};
///
/// let mut matrix = ChannelMatrix::default();
/// matrix.route(Severity::High, "expo");
/// matrix.route(Severity::High, "telegram");
/// matrix.route(Severity::Medium, "telegram");
/// assert_eq!(matrix.channels_for(Severity::High).len(), 2);
/// assert!(matrix.channels_for(Severity::Info).is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMatrix {
    routes: BTreeMap<Severity, BTreeSet<String>>,
}

impl ChannelMatrix {
    pub fn route(&mut self, severity: Severity, channel: &str) {
        self.routes
            .entry(severity)
            .or_default()
            .insert(channel.to_string());
    }

    pub fn channels_for(&self, severity: Severity) -> BTreeSet<String> {
        self.routes.get(&severity).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.values().all(BTreeSet::is_empty)
    }
}
