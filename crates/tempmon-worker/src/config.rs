use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempmon_alert::{Rule, RuleSet};
use tempmon_common::types::{ChannelMatrix, Severity};
use tempmon_notify::indicator::{LocalIndicator, LogIndicator, NoopIndicator, SysfsGpioIndicator};
use tempmon_notify::plugin::ChannelRegistry;
use tempmon_notify::routing::{build_matrix, ChannelRoute};
use tempmon_notify::{NotificationChannel, DEFAULT_TIMEOUT_SECS};
use tempmon_storage::source::{HttpMetricSource, SqliteMetricSource};
use tempmon_storage::state_store::SqliteAlertStore;
use tempmon_storage::MetricSource;

pub const DEFAULT_CONFIG_PATH: &str = "config/tempmon.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Seconds between evaluation cycles in loop mode.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Minimum gap between two outward OPEN notifications of one rule.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Rules at or above this severity drive the LED and buzzer.
    #[serde(default = "default_local_alarm_severity")]
    pub local_alarm_severity: Severity,
    /// Transitions below this severity are never sent to any channel.
    #[serde(default = "default_notify_min_severity")]
    pub notify_min_severity: Severity,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    /// Empty means the built-in process rules.
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Latest row of the collector's readings table. `path` defaults to the
    /// alert store database.
    Sqlite {
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default = "default_readings_table")]
        table: String,
        #[serde(default = "default_timestamp_column")]
        timestamp_column: String,
    },
    Http {
        url: String,
        #[serde(default = "default_source_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Sqlite {
            path: None,
            table: default_readings_table(),
            timestamp_column: default_timestamp_column(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndicatorConfig {
    Gpio {
        #[serde(default = "default_gpio_root")]
        root: PathBuf,
        #[serde(default = "default_led_pin")]
        led_pin: u32,
        #[serde(default = "default_buzzer_pin")]
        buzzer_pin: u32,
    },
    #[default]
    Log,
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub channel_type: String,
    #[serde(default = "default_channel_min_severity")]
    pub min_severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-call timeout. Defaults depend on the channel type.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_channel_config")]
    pub config: serde_json::Value,
}

impl ChannelConfig {
    pub fn timeout(&self) -> Duration {
        let secs = self.timeout_secs.unwrap_or(match self.channel_type.as_str() {
            "telegram" => 10,
            _ => DEFAULT_TIMEOUT_SECS,
        });
        Duration::from_secs(secs)
    }
}

fn default_device_id() -> String {
    "pi5-001".to_string()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_cooldown_secs() -> u64 {
    120
}

fn default_local_alarm_severity() -> Severity {
    Severity::High
}

fn default_notify_min_severity() -> Severity {
    Severity::Info
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/tempmon.sqlite")
}

fn default_readings_table() -> String {
    "readings".to_string()
}

fn default_timestamp_column() -> String {
    "ts_ms".to_string()
}

fn default_source_timeout_secs() -> u64 {
    3
}

fn default_gpio_root() -> PathBuf {
    PathBuf::from(SysfsGpioIndicator::DEFAULT_ROOT)
}

fn default_led_pin() -> u32 {
    17
}

fn default_buzzer_pin() -> u32 {
    27
}

fn default_channel_min_severity() -> Severity {
    Severity::Info
}

fn default_enabled() -> bool {
    true
}

fn default_channel_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Channels built from the enabled `[[channels]]` entries plus the
/// severity routing between them.
pub struct ChannelSetup {
    pub channels: Vec<Arc<dyn NotificationChannel>>,
    pub matrix: ChannelMatrix,
}

impl WorkerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        Self::parse(&content).with_context(|| format!("Invalid config file '{path}'"))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.interval_secs == 0 {
            anyhow::bail!("interval_secs must be at least 1");
        }
        Ok(config)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs.min(u64::from(u32::MAX)) as i64)
    }

    pub fn rule_set(&self) -> anyhow::Result<RuleSet> {
        if self.rules.is_empty() {
            return Ok(RuleSet::builtin());
        }
        RuleSet::new(self.rules.clone()).context("Invalid [[rules]]")
    }

    /// Instantiates every enabled channel through its plugin. Fails on
    /// unknown channel types, invalid channel configs and duplicate names.
    pub fn build_channels(&self, registry: &ChannelRegistry) -> anyhow::Result<ChannelSetup> {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
        let mut routes = Vec::new();
        let mut seen = HashSet::new();
        for ch in &self.channels {
            if !seen.insert(ch.name.as_str()) {
                anyhow::bail!("Duplicate channel name '{}'", ch.name);
            }
            if !ch.enabled {
                tracing::info!(channel = %ch.name, "Channel disabled, skipping");
                continue;
            }
            let channel = registry
                .create_channel(&ch.channel_type, &ch.name, &ch.config, ch.timeout())
                .with_context(|| format!("Invalid channel '{}'", ch.name))?;
            if let Some(plugin) = registry.get_plugin(&ch.channel_type) {
                tracing::info!(
                    channel = %ch.name,
                    channel_type = %ch.channel_type,
                    min_severity = %ch.min_severity,
                    config = %plugin.redact_config(&ch.config),
                    "Channel configured"
                );
            }
            channels.push(channel);
            routes.push(ChannelRoute {
                channel: ch.name.clone(),
                min_severity: ch.min_severity,
            });
        }
        Ok(ChannelSetup {
            channels,
            matrix: build_matrix(&routes, self.notify_min_severity),
        })
    }

    pub fn open_store(&self) -> anyhow::Result<SqliteAlertStore> {
        SqliteAlertStore::open(&self.storage.path).with_context(|| {
            format!(
                "Failed to open alert store '{}'",
                self.storage.path.display()
            )
        })
    }

    /// Opens the metric source configured in `[source]`, reading the given
    /// metric names.
    pub fn open_source(&self, metrics: Vec<String>) -> anyhow::Result<Arc<dyn MetricSource>> {
        match &self.source {
            SourceConfig::Sqlite {
                path,
                table,
                timestamp_column,
            } => {
                let path: &Path = path.as_deref().unwrap_or(&self.storage.path);
                let source = SqliteMetricSource::open(path, table, timestamp_column, metrics)
                    .with_context(|| format!("Failed to open readings '{}'", path.display()))?;
                Ok(Arc::new(source))
            }
            SourceConfig::Http { url, timeout_secs } => {
                let source =
                    HttpMetricSource::new(url, Duration::from_secs(*timeout_secs), metrics)?;
                Ok(Arc::new(source))
            }
        }
    }

    /// Falls back to the log indicator when the GPIO tree cannot be opened,
    /// so a missing LED never keeps alerts from going out.
    pub fn open_indicator(&self) -> Arc<dyn LocalIndicator> {
        match &self.indicator {
            IndicatorConfig::Gpio {
                root,
                led_pin,
                buzzer_pin,
            } => match SysfsGpioIndicator::open(root, *led_pin, *buzzer_pin) {
                Ok(gpio) => Arc::new(gpio),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "GPIO indicator unavailable, falling back to log indicator"
                    );
                    Arc::new(LogIndicator::default())
                }
            },
            IndicatorConfig::Log => Arc::new(LogIndicator::default()),
            IndicatorConfig::Disabled => Arc::new(NoopIndicator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = WorkerConfig::parse("").unwrap();
        assert_eq!(config.device_id, "pi5-001");
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.cooldown_secs, 120);
        assert_eq!(config.local_alarm_severity, Severity::High);
        assert_eq!(config.notify_min_severity, Severity::Info);
        assert!(matches!(config.source, SourceConfig::Sqlite { .. }));
        assert!(matches!(config.indicator, IndicatorConfig::Log));
        assert_eq!(config.rule_set().unwrap().len(), 4);
    }

    #[test]
    fn parses_full_config() {
        let config = WorkerConfig::parse(
            r#"
            device_id = "press-7"
            cooldown_secs = 300
            local_alarm_severity = "medium"

            [source]
            kind = "http"
            url = "http://127.0.0.1:8000/api/latest"

            [indicator]
            kind = "gpio"
            led_pin = 5

            [[rules]]
            metric = "temp"
            comparator = ">"
            open_threshold = 80.0
            clear_threshold = 75.0
            severity = "high"
            message = "Oven hot"

            [[channels]]
            name = "ops"
            channel_type = "telegram"
            min_severity = "medium"

            [channels.config]
            bot_token = "123:abc"
            chat_id = "-100"
            "#,
        )
        .unwrap();

        assert_eq!(config.device_id, "press-7");
        assert_eq!(config.cooldown(), chrono::Duration::seconds(300));
        assert!(matches!(config.source, SourceConfig::Http { timeout_secs: 3, .. }));
        match &config.indicator {
            IndicatorConfig::Gpio {
                led_pin,
                buzzer_pin,
                ..
            } => {
                assert_eq!(*led_pin, 5);
                assert_eq!(*buzzer_pin, 27);
            }
            other => panic!("unexpected indicator: {other:?}"),
        }
        assert_eq!(config.rule_set().unwrap().len(), 1);
        assert_eq!(config.channels[0].timeout(), Duration::from_secs(10));
        assert_eq!(config.channels[0].config["chat_id"], "-100");
    }

    #[test]
    fn legacy_rule_fields_and_severity_names_load() {
        let config = WorkerConfig::parse(
            r#"
            notify_min_severity = "warn"
            local_alarm_severity = "critical"

            [[rules]]
            metric = "temp"
            op = ">"
            threshold = 40.0
            clear = 38.0
            sev = "crit"
            msg = "Temp high"

            [[rules]]
            metric = "current"
            op = ">"
            threshold = 25.0
            clear = 22.0
            sev = "warning"
            msg = "Over current"

            [[channels]]
            name = "ops"
            channel_type = "webhook"
            min_severity = "warn"
            "#,
        )
        .unwrap();

        assert_eq!(config.notify_min_severity, Severity::Medium);
        assert_eq!(config.local_alarm_severity, Severity::High);
        assert_eq!(config.channels[0].min_severity, Severity::Medium);
        let rules = config.rule_set().unwrap();
        assert_eq!(rules.rules()[0].severity, Severity::High);
        assert_eq!(rules.rules()[1].severity, Severity::Medium);
    }

    #[test]
    fn threshold_inversion_fails() {
        let config = WorkerConfig::parse(
            r#"
            [[rules]]
            metric = "temp"
            comparator = ">"
            open_threshold = 38.0
            clear_threshold = 40.0
            severity = "high"
            message = "Inverted"
            "#,
        )
        .unwrap();
        assert!(config.rule_set().is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        assert!(WorkerConfig::parse("interval_secs = 0").is_err());
    }

    #[test]
    fn channel_matrix_respects_floors() {
        let config = WorkerConfig::parse(
            r#"
            notify_min_severity = "medium"

            [[channels]]
            name = "hook"
            channel_type = "webhook"
            config = { url = "http://127.0.0.1:9/hook" }

            [[channels]]
            name = "pager"
            channel_type = "webhook"
            min_severity = "high"
            config = { url = "http://127.0.0.1:9/pager" }

            [[channels]]
            name = "off"
            channel_type = "webhook"
            enabled = false
            config = { url = "http://127.0.0.1:9/off" }
            "#,
        )
        .unwrap();
        let setup = config.build_channels(&ChannelRegistry::default()).unwrap();
        assert_eq!(setup.channels.len(), 2);
        assert!(setup.matrix.channels_for(Severity::Info).is_empty());
        assert_eq!(setup.matrix.channels_for(Severity::Medium).len(), 1);
        assert_eq!(setup.matrix.channels_for(Severity::High).len(), 2);
    }

    #[test]
    fn unknown_channel_type_fails() {
        let config = WorkerConfig::parse(
            r#"
            [[channels]]
            name = "x"
            channel_type = "carrier-pigeon"
            "#,
        )
        .unwrap();
        let err = config
            .build_channels(&ChannelRegistry::default())
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("carrier-pigeon"));
    }

    #[test]
    fn duplicate_channel_name_fails() {
        let config = WorkerConfig::parse(
            r#"
            [[channels]]
            name = "hook"
            channel_type = "webhook"
            config = { url = "http://127.0.0.1:9/a" }

            [[channels]]
            name = "hook"
            channel_type = "webhook"
            config = { url = "http://127.0.0.1:9/b" }
            "#,
        )
        .unwrap();
        assert!(config.build_channels(&ChannelRegistry::default()).is_err());
    }

    #[test]
    fn disabled_indicator() {
        let config = WorkerConfig::parse("[indicator]\nkind = \"none\"").unwrap();
        assert_eq!(config.open_indicator().kind(), "none");
    }
}
