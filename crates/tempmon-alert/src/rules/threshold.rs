use crate::error::{Result, RuleError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tempmon_common::types::Severity;

/// Direction of a threshold rule. Comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Comparator {
    GreaterThan,
    LessThan,
}

impl FromStr for Comparator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            ">" | "gt" | "greater_than" => Ok(Self::GreaterThan),
            "<" | "lt" | "less_than" => Ok(Self::LessThan),
            other => Err(RuleError::UnknownComparator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Comparator {
    type Error = RuleError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Comparator> for String {
    fn from(op: Comparator) -> Self {
        op.symbol().to_string()
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Comparator {
    pub fn check(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::GreaterThan => Self::LessThan,
            Self::LessThan => Self::GreaterThan,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
        }
    }

    fn word(self) -> &'static str {
        match self {
            Self::GreaterThan => "above",
            Self::LessThan => "below",
        }
    }
}

/// A hysteresis threshold rule on a single metric.
///
/// The rule opens when the reading crosses `open_threshold` in the
/// `comparator` direction and clears only once it crosses `clear_threshold`
/// in the opposite direction.
///
/// # Examples
///
/// ```
/// use tempmon_alert::rules::{Comparator, Rule};
/// use tempmon_common::types::Severity;
///
/// let rule = Rule::new("temp", Comparator::GreaterThan, 40.0, 38.0, Severity::High, "Temperature too high");
/// assert!(rule.validate().is_ok());
/// assert!(rule.is_violating(41.0));
/// assert!(!rule.is_cleared(39.0));
/// assert!(rule.is_cleared(37.5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Explicit state key. Needed only when several rules watch the same
    /// metric.
    #[serde(default)]
    pub id: Option<String>,
    pub metric: String,
    #[serde(alias = "op")]
    pub comparator: Comparator,
    #[serde(alias = "threshold")]
    pub open_threshold: f64,
    #[serde(alias = "clear")]
    pub clear_threshold: f64,
    #[serde(alias = "sev")]
    pub severity: Severity,
    /// Message text. `{{metric}}`, `{{device_id}}`, `{{open_threshold}}` and
    /// `{{clear_threshold}}` are substituted.
    #[serde(alias = "message_template", alias = "msg")]
    pub message: String,
    /// Overrides the engine-wide cooldown for this rule.
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
}

impl Rule {
    pub fn new(
        metric: &str,
        comparator: Comparator,
        open_threshold: f64,
        clear_threshold: f64,
        severity: Severity,
        message: &str,
    ) -> Self {
        Self {
            id: None,
            metric: metric.to_string(),
            comparator,
            open_threshold,
            clear_threshold,
            severity,
            message: message.to_string(),
            cooldown_secs: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = Some(secs);
        self
    }

    /// Key under which this rule's [`AlertState`](tempmon_common::types::AlertState)
    /// is stored.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.metric)
    }

    pub fn is_violating(&self, value: f64) -> bool {
        self.comparator.check(value, self.open_threshold)
    }

    pub fn is_cleared(&self, value: f64) -> bool {
        self.comparator.opposite().check(value, self.clear_threshold)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric.trim().is_empty() {
            return Err(RuleError::MissingMetric);
        }
        if !self.open_threshold.is_finite() {
            return Err(RuleError::NonFinite {
                key: self.key().to_string(),
                field: "open_threshold",
            });
        }
        if !self.clear_threshold.is_finite() {
            return Err(RuleError::NonFinite {
                key: self.key().to_string(),
                field: "clear_threshold",
            });
        }

        let (inverted, expected) = match self.comparator {
            Comparator::GreaterThan => (self.clear_threshold >= self.open_threshold, "below"),
            Comparator::LessThan => (self.clear_threshold <= self.open_threshold, "above"),
        };
        if inverted {
            return Err(RuleError::ThresholdInversion {
                key: self.key().to_string(),
                comparator: self.comparator.to_string(),
                open: self.open_threshold,
                clear: self.clear_threshold,
                expected,
            });
        }
        Ok(())
    }

    pub fn render_message(&self, device_id: &str) -> String {
        self.message
            .replace("{{metric}}", &self.metric)
            .replace("{{device_id}}", device_id)
            .replace("{{open_threshold}}", &format!("{:.2}", self.open_threshold))
            .replace("{{clear_threshold}}", &format!("{:.2}", self.clear_threshold))
    }

    /// One-line human description, used in logs.
    pub fn describe(&self) -> String {
        format!(
            "{} {} {:.2} (clears {} {:.2}, {})",
            self.metric,
            self.comparator.word(),
            self.open_threshold,
            self.comparator.opposite().word(),
            self.clear_threshold,
            self.severity,
        )
    }
}
