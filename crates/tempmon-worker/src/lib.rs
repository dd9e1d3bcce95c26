//! Alert worker: loads the configuration, wires the metric source, alert
//! store, channels and local indicator together and runs evaluation cycles.

pub mod config;
pub mod coordinator;

use anyhow::Context;
use config::{WorkerConfig, DEFAULT_CONFIG_PATH};
use coordinator::DispatchCoordinator;
use std::sync::Arc;
use tempmon_alert::{AlertEngine, EngineSettings};
use tempmon_notify::manager::NotificationManager;
use tempmon_notify::plugin::ChannelRegistry;

/// Validates `config` and assembles a ready-to-run coordinator. Any rule or
/// channel error aborts here, before the first cycle.
pub fn build_coordinator(config: &WorkerConfig) -> anyhow::Result<DispatchCoordinator> {
    let rules = config.rule_set()?;
    let registry = ChannelRegistry::default();
    let setup = config.build_channels(&registry)?;
    if setup.matrix.is_empty() {
        tracing::warn!("No notification channels routed, alerts stay local");
    }

    let mut metrics: Vec<String> = rules.rules().iter().map(|r| r.metric.clone()).collect();
    metrics.sort();
    metrics.dedup();

    let store = config.open_store()?;
    let source = config
        .open_source(metrics)
        .context("Failed to set up metric source")?;
    let indicator = config.open_indicator();

    tracing::info!(
        device_id = %config.device_id,
        rules = rules.len(),
        channels = setup.channels.len(),
        source = %source.describe(),
        indicator = %indicator.kind(),
        cooldown_secs = config.cooldown_secs,
        local_alarm_severity = %config.local_alarm_severity,
        "Alert worker configured"
    );

    let engine = AlertEngine::new(
        rules,
        EngineSettings {
            device_id: config.device_id.clone(),
            cooldown: config.cooldown(),
            local_alarm_severity: config.local_alarm_severity,
            channels: setup.matrix,
        },
    );
    Ok(DispatchCoordinator::new(
        engine,
        Arc::new(store),
        source,
        NotificationManager::new(setup.channels),
        indicator,
    ))
}

/// Events shown by `history` when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Splits the arguments following `history` into a config path and an event
/// limit. A single numeric argument is taken as the limit.
pub fn history_args(args: &[String]) -> anyhow::Result<(&str, usize)> {
    match args {
        [] => Ok((DEFAULT_CONFIG_PATH, DEFAULT_HISTORY_LIMIT)),
        [only] => match only.parse() {
            Ok(limit) => Ok((DEFAULT_CONFIG_PATH, limit)),
            Err(_) => Ok((only.as_str(), DEFAULT_HISTORY_LIMIT)),
        },
        [config, limit, ..] => {
            let limit = limit
                .parse()
                .with_context(|| format!("history limit must be a number, got '{limit}'"))?;
            Ok((config.as_str(), limit))
        }
    }
}
