/// Rule-table validation errors. Raised while loading configuration, never
/// during an evaluation cycle.
///
/// # Examples
///
/// ```rust
/// use tempmon_alert::error::RuleError;
///
/// let err = RuleError::DuplicateKey("temp".to_string());
/// assert!(err.to_string().contains("temp"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    /// The rule table contains no rules.
    #[error("Rule: rule set is empty")]
    Empty,

    /// A rule has an empty metric name.
    #[error("Rule: metric name must not be empty")]
    MissingMetric,

    /// A threshold is NaN or infinite.
    #[error("Rule '{key}': {field} must be a finite number")]
    NonFinite { key: String, field: &'static str },

    /// The clear threshold is on the wrong side of the open threshold, so the
    /// rule would have no hysteresis band.
    #[error(
        "Rule '{key}': clear threshold {clear} must be {expected} open threshold {open} for a '{comparator}' rule"
    )]
    ThresholdInversion {
        key: String,
        comparator: String,
        open: f64,
        clear: f64,
        expected: &'static str,
    },

    /// Two rules share the same state key.
    #[error("Rule: duplicate rule key '{0}' (give one of the rules an explicit id)")]
    DuplicateKey(String),

    /// The comparator string is not recognised.
    #[error("Rule: unknown comparator '{0}'")]
    UnknownComparator(String),
}

/// Convenience `Result` alias for rule validation.
pub type Result<T> = std::result::Result<T, RuleError>;
