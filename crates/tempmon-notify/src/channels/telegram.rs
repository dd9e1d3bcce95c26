use super::http_client;
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{outcome_for_status, truncate_string, MAX_BODY_LENGTH};
use crate::{NotificationChannel, SendOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempmon_common::types::NotificationRequest;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Sends alerts as plain-text messages through the Telegram Bot API.
pub struct TelegramChannel {
    name: String,
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    timeout: Duration,
}

impl TelegramChannel {
    pub fn new(
        name: &str,
        api_base: &str,
        bot_token: &str,
        chat_id: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            client: http_client(timeout)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            timeout,
        })
    }

    pub(crate) fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    pub(crate) fn format_text(request: &NotificationRequest) -> String {
        format!("[{}] {}\n{}", request.severity, request.title, request.body)
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send(&self, request: &NotificationRequest) -> SendOutcome {
        let text = Self::format_text(request);
        let form = [("chat_id", self.chat_id.as_str()), ("text", text.as_str())];

        let resp = match self.client.post(self.send_url()).form(&form).send().await {
            Ok(resp) => resp,
            // reqwest errors embed the URL, which carries the bot token
            Err(e) => return NotifyError::from(e.without_url()).into_outcome(),
        };

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map(|t| truncate_string(&t, MAX_BODY_LENGTH))
            .unwrap_or_default();

        // Telegram answers 200 only for accepted messages
        if status != 200 {
            return outcome_for_status("telegram", status, &body);
        }
        SendOutcome::Delivered
    }

    fn channel_type(&self) -> &str {
        "telegram"
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
struct TelegramConfig {
    bot_token: String,
    chat_id: String,
    #[serde(default = "default_api_base")]
    api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn parse_config(config: &Value) -> Result<TelegramConfig> {
    let cfg: TelegramConfig = serde_json::from_value(config.clone())
        .map_err(|e| NotifyError::InvalidConfig(format!("telegram: {e}")))?;
    if cfg.bot_token.trim().is_empty() {
        return Err(NotifyError::InvalidConfig(
            "telegram: bot_token must not be empty".to_string(),
        ));
    }
    if cfg.chat_id.trim().is_empty() {
        return Err(NotifyError::InvalidConfig(
            "telegram: chat_id must not be empty".to_string(),
        ));
    }
    Ok(cfg)
}

pub struct TelegramPlugin;

impl ChannelPlugin for TelegramPlugin {
    fn name(&self) -> &str {
        "telegram"
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
        Ok(Arc::new(TelegramChannel::new(
            instance_name,
            &cfg.api_base,
            &cfg.bot_token,
            &cfg.chat_id,
            timeout,
        )?))
    }
}
