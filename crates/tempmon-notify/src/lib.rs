//! Notification delivery with pluggable channel support.
//!
//! Alert transitions are routed to one or more [`NotificationChannel`]
//! implementations based on severity. Built-in channels are Expo push,
//! Telegram bot messages and generic webhooks. Every send is a single
//! bounded attempt whose result is reported as a [`SendOutcome`]; channel
//! failures never propagate to the caller.
//!
//! The on-device LED and buzzer live behind [`indicator::LocalIndicator`].

pub mod channels;
pub mod error;
pub mod indicator;
pub mod manager;
pub mod plugin;
pub mod routing;
pub mod utils;


use async_trait::async_trait;
use std::time::Duration;
use tempmon_common::types::NotificationRequest;

/// Default per-call timeout when a channel config does not set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 8;

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The remote service accepted the notification.
    Delivered,
    /// Network trouble, timeout, rate limiting or a 5xx. The next transition
    /// may well succeed.
    TransientFailure(String),
    /// The channel is misconfigured or the request was rejected outright
    /// (bad token, unknown chat, malformed payload).
    Fatal(String),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SendOutcome::Delivered => "delivered",
            SendOutcome::TransientFailure(_) => "transient_failure",
            SendOutcome::Fatal(_) => "fatal",
        }
    }
}

impl std::fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendOutcome::Delivered => write!(f, "delivered"),
            SendOutcome::TransientFailure(reason) => write!(f, "transient failure: {reason}"),
            SendOutcome::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}

/// A notification delivery channel that forwards alert transitions to an
/// external service.
///
/// Implementations are created by the corresponding [`plugin::ChannelPlugin`]
/// and dispatched by [`manager::NotificationManager`].
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Makes exactly one delivery attempt. Must not panic and must not
    /// retry; the caller additionally bounds the call by [`Self::timeout`].
    async fn send(&self, request: &NotificationRequest) -> SendOutcome;

    /// Returns the channel type name (e.g., `"expo"`, `"telegram"`).
    fn channel_type(&self) -> &str;

    /// Returns the configured instance name used in routing tables.
    fn name(&self) -> &str;

    /// Upper bound for a single [`Self::send`] call.
    fn timeout(&self) -> Duration;
}
