pub mod expo;
pub mod telegram;
pub mod webhook;

use crate::error::Result;
use std::time::Duration;

/// Builds the HTTP client shared by one channel instance. The client-level
/// timeout bounds connect plus response.
fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tempmon/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
