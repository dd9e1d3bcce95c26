use crate::SendOutcome;

/// Errors that can occur within the notification subsystem.
///
/// Construction errors (`InvalidConfig`, `UnknownChannelType`) surface at
/// startup. Delivery errors are folded into a [`SendOutcome`] by
/// [`NotifyError::into_outcome`] and never reach the engine.
///
/// # Examples
///
/// ```rust
/// use tempmon_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing bot_token".to_string());
/// assert!(err.to_string().contains("bot_token"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The channel type is not registered in the plugin registry.
    #[error("Notify: unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// An HTTP request to an external notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The external API returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    ApiError {
        service: String,
        status: u16,
        body: String,
    },

    /// Driving the local indicator failed.
    #[error("Notify: indicator I/O error on {path}: {source}")]
    Indicator {
        path: String,
        source: std::io::Error,
    },

    /// Generic notification error for cases not covered by other variants.
    #[error("Notify: {0}")]
    Other(String),
}

impl NotifyError {
    /// Whether retrying on a later transition could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::HttpError(e) => !e.is_builder(),
            NotifyError::ApiError { status, .. } => *status == 429 || *status >= 500,
            NotifyError::Indicator { .. } => true,
            NotifyError::InvalidConfig(_)
            | NotifyError::UnknownChannelType(_)
            | NotifyError::JsonError(_)
            | NotifyError::Other(_) => false,
        }
    }

    pub fn into_outcome(self) -> SendOutcome {
        if self.is_transient() {
            SendOutcome::TransientFailure(self.to_string())
        } else {
            SendOutcome::Fatal(self.to_string())
        }
    }
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
