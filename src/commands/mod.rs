//! CLI command implementations for sqlrelay.
//!
//! - [`serve`] - Run the HTTP proxy in front of PostgreSQL
//! - [`query`] - Send one statement through a running proxy
//! - [`check`] - Probe a running proxy with `SELECT 1`

pub mod check;
pub mod query;
pub mod serve;

use sqlrelay::client::{QueryClient, RetryPolicy};
use sqlrelay::reliability::RetryConfig;

/// Build a client for the CLI commands.
fn client(url: &str, retry: bool) -> anyhow::Result<QueryClient> {
    let client = QueryClient::new(url)?;
    Ok(if retry {
        client.with_policy(RetryPolicy::TransientOnly)
    } else {
        client.with_retry(RetryConfig::none())
    })
}
