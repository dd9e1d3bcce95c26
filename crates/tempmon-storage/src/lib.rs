//! Persistence for alert state and history, and the metric sources that
//! feed the evaluator.
//!
//! [`state_store::SqliteAlertStore`] keeps one `alert_state` row per rule and
//! an append-only `alert_events` log in a single SQLite database, and commits
//! a state change together with its event in one transaction.
//! [`source::SqliteMetricSource`] and [`source::HttpMetricSource`] provide the
//! latest snapshot of sensor readings.

pub mod error;
pub mod source;
pub mod state_store;


use async_trait::async_trait;
use error::Result;
use tempmon_common::types::{AlertEvent, AlertState, MetricSnapshot};

/// Durable per-rule alert state plus the alert history.
///
/// Implementations must be safe to share across threads (`Send + Sync`).
/// Cycles never overlap, so a single writer per key is guaranteed by the
/// caller.
pub trait AlertStateStore: Send + Sync {
    /// Returns the stored state for `key`, or the default (inactive, never
    /// notified) state when the key has never been committed.
    fn get_state(&self, key: &str) -> Result<AlertState>;

    /// Atomically stores `state` for `key` and appends `event` if given.
    /// Either both writes land or neither does.
    fn commit(&self, key: &str, state: &AlertState, event: Option<&AlertEvent>) -> Result<()>;

    /// Returns the most recent alert events, newest first.
    fn recent_events(&self, limit: usize) -> Result<Vec<AlertEvent>>;

    /// Returns every stored state, ordered by key.
    fn list_states(&self) -> Result<Vec<(String, AlertState)>>;
}

/// Supplier of the most recent metric snapshot.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Returns the latest snapshot, or `None` when no reading exists yet.
    async fn get_latest(&self) -> Result<Option<MetricSnapshot>>;

    /// Short description for logs (e.g., `"sqlite:/var/lib/tempmon/data.sqlite"`).
    fn describe(&self) -> String;
}
