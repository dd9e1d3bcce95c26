use super::http_client;
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{json_escape, outcome_for_status, truncate_string, MAX_BODY_LENGTH};
use crate::{NotificationChannel, SendOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempmon_common::types::{NotificationRequest, Transition};

pub struct WebhookChannel {
    name: String,
    client: reqwest::Client,
    url: String,
    body_template: Option<String>,
    timeout: Duration,
}

impl WebhookChannel {
    pub fn new(
        name: &str,
        url: &str,
        body_template: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            client: http_client(timeout)?,
            url: url.to_string(),
            body_template,
            timeout,
        })
    }

    pub(crate) fn render_body(&self, request: &NotificationRequest) -> String {
        let status = match request.transition {
            Transition::Opened => "firing",
            Transition::Cleared => "recovered",
        };
        // Placeholders sit inside JSON string literals in the template
        if let Some(template) = &self.body_template {
            template
                .replace("{{status}}", status)
                .replace("{{severity}}", &request.severity.to_string())
                .replace("{{value}}", &format!("{:.2}", request.value))
                .replace("{{device_id}}", &json_escape(&request.device_id))
                .replace("{{metric}}", &json_escape(&request.metric))
                .replace("{{title}}", &json_escape(&request.title))
                .replace("{{body}}", &json_escape(&request.body))
        } else {
            serde_json::json!({
                "device_id": request.device_id,
                "metric": request.metric,
                "value": request.value,
                "severity": request.severity.to_string(),
                "title": request.title,
                "body": request.body,
                "status": status,
            })
            .to_string()
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, request: &NotificationRequest) -> SendOutcome {
        let body = self.render_body(request);
        let resp = match self
            .client
            .post(self.url.as_str())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return NotifyError::from(e).into_outcome(),
        };

        let status = resp.status().as_u16();
        let resp_body = match resp.text().await {
            Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
            Err(e) => format!("[failed to read response body: {e}]"),
        };
        tracing::debug!(channel = %self.name, status, body = %resp_body, "Webhook responded");
        outcome_for_status("webhook", status, &resp_body)
    }

    fn channel_type(&self) -> &str {
        "webhook"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

// Plugin

#[derive(Deserialize)]
struct WebhookConfig {
    url: String,
    body_template: Option<String>,
}

fn parse_config(config: &Value) -> Result<WebhookConfig> {
    let cfg: WebhookConfig = serde_json::from_value(config.clone())
        .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
    if !cfg.url.starts_with("http://") && !cfg.url.starts_with("https://") {
        return Err(NotifyError::InvalidConfig(format!(
            "webhook: url must be http(s), got '{}'",
            cfg.url
        )));
    }
    Ok(cfg)
}

pub struct WebhookPlugin;

impl ChannelPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        parse_config(config).map(|_| ())
    }

    fn create_channel(
        &self,
        instance_name: &str,
        config: &Value,
        timeout: Duration,
    ) -> Result<Arc<dyn NotificationChannel>> {
        let cfg = parse_config(config)?;
        Ok(Arc::new(WebhookChannel::new(
            instance_name,
            &cfg.url,
            cfg.body_template,
            timeout,
        )?))
    }
}
