use crate::error::{Result, StorageError};
use crate::AlertStateStore;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tempmon_common::types::{AlertEvent, AlertState, Severity, Transition};

// `alert_state.metric` holds the rule key, which is the metric name unless
// the rule carries an explicit id.
const STATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_state (
    metric TEXT PRIMARY KEY,
    active INTEGER NOT NULL DEFAULT 0,
    last_sent_ms INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS alert_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts_ms INTEGER NOT NULL,
    metric TEXT NOT NULL,
    value REAL,
    threshold REAL,
    severity TEXT NOT NULL,
    state TEXT NOT NULL,
    message TEXT,
    device_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_alert_events_ts ON alert_events(ts_ms);
";

const EVENT_COLUMNS: &str =
    "id, event_id, rule_id, ts_ms, metric, value, threshold, severity, state, message, device_id";

/// SQLite-backed [`AlertStateStore`].
///
/// Uses one connection in WAL mode. Databases created by older collectors
/// (without `event_id`/`rule_id` on `alert_events`) are upgraded in place.
pub struct SqliteAlertStore {
    conn: Mutex<Connection>,
}

impl SqliteAlertStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(STATE_SCHEMA)?;
        migrate_events(&conn)?;
        tracing::info!(path = %path.display(), "Alert state store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AlertStateStore for SqliteAlertStore {
    fn get_state(&self, key: &str) -> Result<AlertState> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare_cached("SELECT active, last_sent_ms FROM alert_state WHERE metric = ?1")?;
        let row = stmt
            .query_row([key], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })
            .optional()?;
        match row {
            Some((active, last_sent_ms)) => Ok(AlertState {
                active: active != 0,
                last_notified_at: from_millis("last_sent_ms", last_sent_ms)?,
            }),
            None => Ok(AlertState::default()),
        }
    }

    fn commit(&self, key: &str, state: &AlertState, event: Option<&AlertEvent>) -> Result<()> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO alert_state (metric, active, last_sent_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(metric) DO UPDATE SET active = excluded.active,
                     last_sent_ms = excluded.last_sent_ms",
            )?;
            stmt.execute(rusqlite::params![
                key,
                i64::from(state.active),
                state.last_notified_at.timestamp_millis(),
            ])?;
        }
        if let Some(event) = event {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO alert_events
                     (event_id, rule_id, ts_ms, metric, value, threshold, severity, state, message, device_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            stmt.execute(rusqlite::params![
                &event.id,
                &event.rule_id,
                event.observed_at.timestamp_millis(),
                &event.metric,
                event.value,
                event.threshold,
                event.severity.to_string(),
                state_label(event.transition),
                &event.message,
                &event.device_id,
            ])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        let conn = self.lock_conn();
        let sql = format!("SELECT {EVENT_COLUMNS} FROM alert_events ORDER BY id DESC LIMIT ?1");
        let mut stmt = conn.prepare_cached(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], RawEvent::from_row)?;
        let mut events = Vec::new();
        for raw in rows {
            events.push(raw?.into_event()?);
        }
        Ok(events)
    }

    fn list_states(&self) -> Result<Vec<(String, AlertState)>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached("SELECT metric, active, last_sent_ms FROM alert_state ORDER BY metric")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut states = Vec::new();
        for row in rows {
            let (key, active, last_sent_ms) = row?;
            states.push((
                key,
                AlertState {
                    active: active != 0,
                    last_notified_at: from_millis("last_sent_ms", last_sent_ms)?,
                },
            ));
        }
        Ok(states)
    }
}

/// Row as stored; legacy rows have no `event_id`/`rule_id`.
struct RawEvent {
    rowid: i64,
    event_id: Option<String>,
    rule_id: Option<String>,
    ts_ms: i64,
    metric: String,
    value: Option<f64>,
    threshold: Option<f64>,
    severity: String,
    state: String,
    message: Option<String>,
    device_id: Option<String>,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            rowid: row.get(0)?,
            event_id: row.get(1)?,
            rule_id: row.get(2)?,
            ts_ms: row.get(3)?,
            metric: row.get(4)?,
            value: row.get(5)?,
            threshold: row.get(6)?,
            severity: row.get(7)?,
            state: row.get(8)?,
            message: row.get(9)?,
            device_id: row.get(10)?,
        })
    }

    fn into_event(self) -> Result<AlertEvent> {
        let severity: Severity = self.severity.parse().map_err(|detail| StorageError::Corrupt {
            column: "severity",
            detail,
        })?;
        let transition: Transition = self.state.parse().map_err(|detail| StorageError::Corrupt {
            column: "state",
            detail,
        })?;
        Ok(AlertEvent {
            id: self.event_id.unwrap_or_else(|| self.rowid.to_string()),
            rule_id: self.rule_id.unwrap_or_else(|| self.metric.clone()),
            observed_at: from_millis("ts_ms", self.ts_ms)?,
            metric: self.metric,
            value: self.value.unwrap_or(f64::NAN),
            threshold: self.threshold.unwrap_or(f64::NAN),
            severity,
            transition,
            message: self.message.unwrap_or_default(),
            device_id: self.device_id.unwrap_or_default(),
        })
    }
}

/// Value written to the `state` column; `open`/`cleared` as in rows written
/// by older collectors.
fn state_label(transition: Transition) -> &'static str {
    match transition {
        Transition::Opened => "open",
        Transition::Cleared => "cleared",
    }
}

fn from_millis(column: &'static str, ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StorageError::Corrupt {
        column,
        detail: format!("timestamp out of range: {ms}"),
    })
}

/// Adds the columns absent from databases written before rule ids existed.
/// A column that is already there is fine; any other failure is returned.
pub(crate) fn migrate_events(conn: &Connection) -> Result<()> {
    for column in ["event_id", "rule_id"] {
        let sql = format!("ALTER TABLE alert_events ADD COLUMN {column} TEXT;");
        match conn.execute_batch(&sql) {
            Ok(()) => tracing::info!(column, "Added column to alert_events"),
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
