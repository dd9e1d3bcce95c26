use anyhow::Result;
use tempmon_notify::plugin::ChannelRegistry;
use tempmon_storage::AlertStateStore;
use tokio::signal;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

use tempmon_worker::{build_coordinator, history_args};
use tempmon_worker::config::{WorkerConfig, DEFAULT_CONFIG_PATH};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  tempmon-alertd [config.toml]                 Run evaluation cycles until Ctrl-C");
    eprintln!("  tempmon-alertd once [config.toml]            Run a single evaluation cycle");
    eprintln!("  tempmon-alertd check-config [config.toml]    Validate the configuration and exit");
    eprintln!("  tempmon-alertd history [config.toml] [n]     Show alert states and the last n events");
}

#[tokio::main]
async fn main() -> Result<()> {
    tempmon_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tempmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_arg = |idx: usize| {
        args.get(idx)
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONFIG_PATH)
    };

    match args.get(1).map(|s| s.as_str()) {
        Some("once") => run_once(config_arg(2)).await,
        Some("check-config") => run_check_config(config_arg(2)),
        Some("history") => {
            let (config_path, limit) = history_args(&args[2..]).map_err(|e| {
                print_usage();
                e
            })?;
            run_history(config_path, limit)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => run_loop(config_arg(1)).await,
    }
}

/// Single cycle, for cron-style scheduling.
async fn run_once(config_path: &str) -> Result<()> {
    let config = WorkerConfig::load(config_path)?;
    let coordinator = build_coordinator(&config)?;
    let report = coordinator.run_cycle().await?;
    tracing::info!(
        skipped = report.skipped(),
        evaluated = report.evaluated,
        transitions = report.transitions.len(),
        failed_rules = report.failed_rules.len(),
        deliveries = report.deliveries.len(),
        delivered = report.delivered(),
        "Cycle finished"
    );
    Ok(())
}

fn run_check_config(config_path: &str) -> Result<()> {
    let config = WorkerConfig::load(config_path)?;
    let rules = config.rule_set()?;
    let setup = config.build_channels(&ChannelRegistry::default())?;
    for rule in rules.rules() {
        tracing::info!(rule = %rule.key(), "{}", rule.describe());
    }
    tracing::info!(
        rules = rules.len(),
        channels = setup.channels.len(),
        "Configuration OK"
    );
    Ok(())
}

#[allow(clippy::print_stdout)]
fn run_history(config_path: &str, limit: usize) -> Result<()> {
    let config = WorkerConfig::load(config_path)?;
    let store = config.open_store()?;
    for (key, state) in store.list_states()? {
        println!(
            "{key:<16} {:<8} last_notified={}",
            if state.active { "ACTIVE" } else { "inactive" },
            state.last_notified_at.to_rfc3339()
        );
    }
    for event in store.recent_events(limit)? {
        println!(
            "{} {:<8} {:<7} {:<16} {}",
            event.observed_at.to_rfc3339(),
            event.transition,
            event.severity,
            event.rule_id,
            event.message
        );
    }
    Ok(())
}

async fn run_loop(config_path: &str) -> Result<()> {
    let config = WorkerConfig::load(config_path)?;
    let coordinator = build_coordinator(&config)?;

    let mut tick = interval(Duration::from_secs(config.interval_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(interval_secs = config.interval_secs, "Alert worker started");

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match coordinator.run_cycle().await {
                    Ok(report) if !report.transitions.is_empty() || !report.failed_rules.is_empty() => {
                        tracing::info!(
                            transitions = report.transitions.len(),
                            failed_rules = report.failed_rules.len(),
                            deliveries = report.deliveries.len(),
                            delivered = report.delivered(),
                            "Cycle finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %format!("{e:#}"), "Evaluation cycle failed"),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down gracefully");
                break;
            }
        }
    }

    tracing::info!("Alert worker stopped");
    Ok(())
}
