use super::http_client;
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{outcome_for_status, truncate_string, MAX_BODY_LENGTH};
use crate::{NotificationChannel, SendOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempmon_common::types::NotificationRequest;

pub const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

/// Push notifications to the mobile app through the Expo push service.
///
/// Device tokens come from an inline list and/or a JSON token file that the
/// app registration endpoint keeps up to date. The file is re-read on every
/// send so newly registered phones receive the next alert.
pub struct ExpoPushChannel {
    name: String,
    client: reqwest::Client,
    url: String,
    tokens: Vec<String>,
    tokens_file: Option<PathBuf>,
    timeout: Duration,
}

impl ExpoPushChannel {
    pub fn new(
        name: &str,
        url: &str,
        tokens: Vec<String>,
        tokens_file: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            client: http_client(timeout)?,
            url: url.to_string(),
            tokens,
            tokens_file,
            timeout,
        })
    }

    async fn collect_tokens(&self) -> Vec<String> {
        let mut tokens = self.tokens.clone();
        if let Some(path) = &self.tokens_file {
            for token in read_token_file(path).await {
                if !tokens.contains(&token) {
                    tokens.push(token);
                }
            }
        }
        tokens
    }

    pub(crate) fn build_messages(tokens: &[String], request: &NotificationRequest) -> Value {
        let messages: Vec<Value> = tokens
            .iter()
            .map(|token| {
                serde_json::json!({
                    "to": token,
                    "title": request.title,
                    "body": request.body,
                    "sound": "default",
                    "data": {
                        "metric": request.metric,
                        "device": request.device_id,
                        "value": request.value,
                        "severity": request.severity.to_string(),
                        "transition": request.transition.to_string(),
                    },
                })
            })
            .collect();
        Value::Array(messages)
    }
}

/// Reads push tokens from a JSON file holding either `["tok", ...]` or
/// `{"tokens": ["tok", ...]}`. A missing or unreadable file yields no tokens.
pub async fn read_token_file(path: &Path) -> Vec<String> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read push token file");
            return Vec::new();
        }
    };
    parse_tokens(&content).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Malformed push token file");
        Vec::new()
    })
}

pub(crate) fn parse_tokens(content: &str) -> Result<Vec<String>> {
    let value: Value = serde_json::from_str(content)?;
    let list = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("tokens") {
            Some(Value::Array(items)) => items,
            _ => return Ok(Vec::new()),
        },
        _ => return Ok(Vec::new()),
    };
    Ok(list
        .iter()
        .filter_map(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect())
}

#[async_trait]
impl NotificationChannel for ExpoPushChannel {
    async fn send(&self, request: &NotificationRequest) -> SendOutcome {
        let tokens = self.collect_tokens().await;
        if tokens.is_empty() {
            return SendOutcome::Fatal("no push tokens registered".to_string());
        }

        let payload = Self::build_messages(&tokens, request);
        let resp = match self.client.post(self.url.as_str()).json(&payload).send().await {
            Ok(resp) => resp,
            Err(e) => return NotifyError::from(e).into_outcome(),
        };

        let status = resp.status().as_u16();
        let body = match resp.text().await {
            Ok(text) => text,
            Err(e) => return NotifyError::from(e).into_outcome(),
        };
        if !(200..300).contains(&status) {
            return outcome_for_status("expo", status, &body);
        }

        ticket_outcome(&body, tokens.len())
    }

    fn channel_type(&self) -> &str {
        "expo"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Interprets the push tickets in a 2xx Expo response. Delivered if at least
/// one ticket is `ok`; fatal if every ticket was rejected.
pub(crate) fn ticket_outcome(body: &str, sent: usize) -> SendOutcome {
    #[derive(Deserialize)]
    struct Ticket {
        status: String,
        #[serde(default)]
        message: Option<String>,
    }
    #[derive(Deserialize)]
    struct Tickets {
        #[serde(default)]
        data: Vec<Ticket>,
    }

    let Ok(tickets) = serde_json::from_str::<Tickets>(body) else {
        tracing::debug!(body = %truncate_string(body, MAX_BODY_LENGTH), "Unrecognised Expo response");
        return SendOutcome::Delivered;
    };

    let rejected: Vec<&Ticket> = tickets.data.iter().filter(|t| t.status != "ok").collect();
    if !tickets.data.is_empty() && rejected.len() == tickets.data.len() {
        let reason = rejected[0]
            .message
            .clone()
            .unwrap_or_else(|| "all push tickets rejected".to_string());
        return SendOutcome::Fatal(reason);
    }
    if !rejected.is_empty() {
        tracing::warn!(
            rejected = rejected.len(),
            sent,
            "Some push tokens were rejected by Expo"
        );
    }
    SendOutcome::Delivered
}

// Plugin

#[derive(Deserialize)]
struct ExpoConfig {
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default)]
    tokens_file: Option<PathBuf>,
    #[serde(default = "default_push_url")]
    url: String,
}

fn default_push_url() -> String {
    EXPO_PUSH_URL.to_string()
}

fn parse_config(config: &Value) -> Result<ExpoConfig> {
    let cfg: ExpoConfig = serde_json::from_value(config.clone())
        .map_err(|e| NotifyError::InvalidConfig(format!("expo: {e}")))?;
    if cfg.tokens.is_empty() && cfg.tokens_file.is_none() {
        return Err(NotifyError::InvalidConfig(
            "expo: either tokens or tokens_file is required".to_string(),
        ));
    }
    Ok(cfg)
}

pub struct ExpoPlugin;

impl ChannelPlugin for ExpoPlugin {
    fn name(&self) -> &str {
        "expo"
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
        Ok(Arc::new(ExpoPushChannel::new(
            instance_name,
            &cfg.url,
            cfg.tokens,
            cfg.tokens_file,
            timeout,
        )?))
    }
}
