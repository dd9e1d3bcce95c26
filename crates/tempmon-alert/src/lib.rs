//! Alert evaluation for process metrics.
//!
//! A [`rules::RuleSet`] is a validated, immutable table of hysteresis
//! threshold rules. [`engine::evaluate`] decides, for one rule and the
//! latest reading, whether the rule opens, clears, or stays put, and emits
//! the side effects the dispatch layer must carry out. Evaluation never
//! performs I/O; persisted state goes in and the next state comes out.

pub mod engine;
pub mod error;
pub mod rules;


pub use engine::{evaluate, AlertEngine, Effect, EngineSettings, EvalContext, Evaluation};
pub use error::RuleError;
pub use rules::{Comparator, Rule, RuleSet};
