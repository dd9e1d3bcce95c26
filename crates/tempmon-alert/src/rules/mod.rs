mod threshold;

pub use threshold::{Comparator, Rule};

use crate::error::{Result, RuleError};
use std::collections::HashSet;
use tempmon_common::types::Severity;

/// A validated, immutable rule table.
///
/// Construction checks every rule and rejects duplicate state keys, so an
/// existing `RuleSet` is always safe to evaluate.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        if rules.is_empty() {
            return Err(RuleError::Empty);
        }

        let mut keys = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !keys.insert(rule.key().to_string()) {
                return Err(RuleError::DuplicateKey(rule.key().to_string()));
            }
        }

        Ok(Self { rules })
    }

    /// The rule table shipped with the device firmware.
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                Rule::new(
                    "temp",
                    Comparator::GreaterThan,
                    40.0,
                    38.0,
                    Severity::High,
                    "Temperature too high",
                ),
                Rule::new(
                    "level",
                    Comparator::LessThan,
                    20.0,
                    25.0,
                    Severity::High,
                    "Oil level too low",
                ),
                Rule::new(
                    "cycles",
                    Comparator::GreaterThan,
                    50.0,
                    45.0,
                    Severity::Info,
                    "Cycle rate high",
                ),
                Rule::new(
                    "current",
                    Comparator::GreaterThan,
                    25.0,
                    22.0,
                    Severity::Medium,
                    "Over current",
                ),
            ],
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
