//! Utility functions for notification channels

use crate::error::NotifyError;
use crate::SendOutcome;
use serde_json::Value;

/// Maximum length of a remote response body kept for logging
pub const MAX_BODY_LENGTH: usize = 500;

/// Truncate a string to at most `max_len` bytes without splitting a character
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// Escape `s` for use inside a JSON string literal, without the quotes.
pub fn json_escape(s: &str) -> String {
    let quoted = Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Map an HTTP response status to a delivery outcome.
///
/// 2xx is delivered, 429 and 5xx are transient, any other status means the
/// request itself was rejected.
pub fn outcome_for_status(service: &str, status: u16, body: &str) -> SendOutcome {
    if (200..300).contains(&status) {
        return SendOutcome::Delivered;
    }
    NotifyError::ApiError {
        service: service.to_string(),
        status,
        body: truncate_string(body, MAX_BODY_LENGTH),
    }
    .into_outcome()
}

/// Redact sensitive fields from JSON configuration
///
/// Replaces values for keys that commonly hold secrets:
/// - password, secret
/// - token (bot_token, access_token, ...)
/// - api_key, apikey
pub fn redact_sensitive_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                let key_lower = key.to_lowercase();
                let is_sensitive = key_lower.contains("password")
                    || key_lower.contains("secret")
                    || (key_lower.contains("token") && !key_lower.contains("tokens_file"))
                    || key_lower.contains("api_key")
                    || key_lower.contains("apikey");

                if is_sensitive {
                    redacted.insert(key.clone(), Value::String("***".to_string()));
                } else if val.is_object() || val.is_array() {
                    redacted.insert(key.clone(), redact_sensitive_json(val));
                } else {
                    redacted.insert(key.clone(), val.clone());
                }
            }
            Value::Object(redacted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(redact_sensitive_json).collect()),
        _ => value.clone(),
    }
}
