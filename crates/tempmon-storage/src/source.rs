use crate::error::{Result, StorageError};
use crate::MetricSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempmon_common::types::MetricSnapshot;

/// Reads the newest row of the collector's readings table.
///
/// Every metric name maps to the column of the same name. Metrics whose
/// column does not exist are reported as missing, so a rule on a sensor the
/// collector never recorded simply never fires.
pub struct SqliteMetricSource {
    path: PathBuf,
    table: String,
    timestamp_column: String,
    metrics: Vec<String>,
    conn: Mutex<Connection>,
}

impl SqliteMetricSource {
    pub fn open(
        path: &Path,
        table: &str,
        timestamp_column: &str,
        metrics: Vec<String>,
    ) -> Result<Self> {
        check_identifier(table)?;
        check_identifier(timestamp_column)?;
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(2))?;
        Ok(Self {
            path: path.to_path_buf(),
            table: table.to_string(),
            timestamp_column: timestamp_column.to_string(),
            metrics,
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_latest(&self) -> Result<Option<MetricSnapshot>> {
        let conn = self.lock_conn();
        let columns = table_columns(&conn, &self.table)?;
        if columns.is_empty() {
            tracing::debug!(table = %self.table, "Readings table not created yet");
            return Ok(None);
        }
        if !columns.contains(&self.timestamp_column) {
            return Err(StorageError::Source(format!(
                "table '{}' has no column '{}'",
                self.table, self.timestamp_column
            )));
        }

        let present: Vec<&String> = self
            .metrics
            .iter()
            .filter(|m| columns.contains(m) && check_identifier(m).is_ok())
            .collect();
        let mut select = vec![format!("\"{}\"", self.timestamp_column)];
        select.extend(present.iter().map(|m| format!("\"{m}\"")));
        let sql = format!(
            "SELECT {} FROM \"{}\" ORDER BY \"{}\" DESC LIMIT 1",
            select.join(", "),
            self.table,
            self.timestamp_column
        );

        let mut stmt = conn.prepare_cached(&sql)?;
        let row = stmt
            .query_row([], |row| {
                let ts_ms: i64 = row.get(0)?;
                let mut values = Vec::with_capacity(present.len());
                for idx in 0..present.len() {
                    values.push(numeric(row.get_ref(idx + 1)?));
                }
                Ok((ts_ms, values))
            })
            .optional()?;
        let Some((ts_ms, values)) = row else {
            return Ok(None);
        };

        let observed_at = DateTime::from_timestamp_millis(ts_ms).ok_or_else(|| {
            StorageError::Source(format!("reading timestamp out of range: {ts_ms}"))
        })?;
        let mut snapshot = MetricSnapshot::new(observed_at);
        for metric in &self.metrics {
            snapshot = snapshot.with_value(metric, None);
        }
        for (metric, value) in present.into_iter().zip(values) {
            snapshot = snapshot.with_value(metric, value);
        }
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl MetricSource for SqliteMetricSource {
    async fn get_latest(&self) -> Result<Option<MetricSnapshot>> {
        self.read_latest()
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

/// Column names of `table`, empty when the table does not exist.
fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = Vec::new();
    for col in rows {
        columns.push(col?);
    }
    Ok(columns)
}

/// Converts a stored cell to a reading. Text that does not parse as a number
/// counts as missing.
fn numeric(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier(name.to_string()))
    }
}

/// Polls a collector's HTTP endpoint that answers with a flat JSON object:
/// `{"ok": true, "ts_ms": 1700000000000, "temp": 41.2, "level": null, ...}`.
///
/// `"ok": false` is reported as an error. A missing `ts_ms` falls back to
/// the local clock.
pub struct HttpMetricSource {
    client: reqwest::Client,
    url: String,
    metrics: Vec<String>,
}

impl HttpMetricSource {
    pub fn new(url: &str, timeout: Duration, metrics: Vec<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tempmon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            metrics,
        })
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn get_latest(&self) -> Result<Option<MetricSnapshot>> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StorageError::Source(format!(
                "{} returned HTTP {}",
                self.url,
                status.as_u16()
            )));
        }
        let body: serde_json::Value = resp.json().await?;
        parse_reading(&body, &self.metrics, Utc::now()).map(Some)
    }

    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }
}

pub(crate) fn parse_reading(
    body: &serde_json::Value,
    metrics: &[String],
    now: DateTime<Utc>,
) -> Result<MetricSnapshot> {
    let obj = body
        .as_object()
        .ok_or_else(|| StorageError::Source("reading is not a JSON object".to_string()))?;
    if !obj.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
        let reason = obj
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("source reported ok=false");
        return Err(StorageError::Source(reason.to_string()));
    }
    let observed_at = obj
        .get("ts_ms")
        .and_then(|v| v.as_i64())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(now);

    let mut snapshot = MetricSnapshot::new(observed_at);
    for metric in metrics {
        let value = obj.get(metric).and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        snapshot = snapshot.with_value(metric, value);
    }
    Ok(snapshot)
}
