use crate::{NotificationChannel, SendOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempmon_common::types::NotificationRequest;
use tokio::task::JoinSet;

/// Grace added on top of a channel's own timeout before the call is
/// abandoned.
const TIMEOUT_GRACE: Duration = Duration::from_millis(500);

/// Result of one channel call within a dispatch.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub channel: String,
    pub outcome: SendOutcome,
    pub elapsed: Duration,
}

/// Fans a [`NotificationRequest`] out to its routed channels.
///
/// Each channel runs in its own task under a hard timeout, so a hung or
/// panicking channel can neither delay nor break the others.
pub struct NotificationManager {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationManager {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// Sends `request` to every channel it is routed to and returns one
    /// report per routed channel, sorted by channel name. Never fails.
    pub async fn dispatch(&self, request: &NotificationRequest) -> Vec<DeliveryReport> {
        let mut reports = Vec::new();
        let mut tasks = JoinSet::new();
        let request = Arc::new(request.clone());

        for name in &request.channels {
            let Some(channel) = self.channels.iter().find(|c| c.name() == name) else {
                tracing::error!(channel = %name, "Notification routed to unknown channel");
                reports.push(DeliveryReport {
                    channel: name.clone(),
                    outcome: SendOutcome::Fatal("channel not configured".to_string()),
                    elapsed: Duration::ZERO,
                });
                continue;
            };

            let channel = Arc::clone(channel);
            let request = Arc::clone(&request);
            let name = name.clone();
            tasks.spawn(async move {
                let limit = channel.timeout() + TIMEOUT_GRACE;
                let start = Instant::now();
                let outcome = match tokio::time::timeout(limit, channel.send(&request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => SendOutcome::TransientFailure(format!(
                        "timed out after {}ms",
                        limit.as_millis()
                    )),
                };
                DeliveryReport {
                    channel: name,
                    outcome,
                    elapsed: start.elapsed(),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(error = %e, "Notification task panicked");
                }
            }
        }

        // A panicked task loses its name; account for it by elimination.
        for name in &request.channels {
            if !reports.iter().any(|r| &r.channel == name) {
                reports.push(DeliveryReport {
                    channel: name.clone(),
                    outcome: SendOutcome::Fatal("channel task panicked".to_string()),
                    elapsed: Duration::ZERO,
                });
            }
        }

        reports.sort_by(|a, b| a.channel.cmp(&b.channel));
        for report in &reports {
            log_report(report, &request);
        }
        reports
    }
}

fn log_report(report: &DeliveryReport, request: &NotificationRequest) {
    let elapsed_ms = report.elapsed.as_millis() as u64;
    match &report.outcome {
        SendOutcome::Delivered => tracing::info!(
            channel = %report.channel,
            metric = %request.metric,
            transition = %request.transition,
            outcome = report.outcome.label(),
            elapsed_ms,
            "Notification delivered"
        ),
        SendOutcome::TransientFailure(reason) => tracing::warn!(
            channel = %report.channel,
            metric = %request.metric,
            transition = %request.transition,
            outcome = report.outcome.label(),
            elapsed_ms,
            error = %reason,
            "Notification failed (transient)"
        ),
        SendOutcome::Fatal(reason) => tracing::error!(
            channel = %report.channel,
            metric = %request.metric,
            transition = %request.transition,
            outcome = report.outcome.label(),
            elapsed_ms,
            error = %reason,
            "Notification failed (check channel configuration)"
        ),
    }
}
