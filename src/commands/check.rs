//! Probe a running proxy.

use anyhow::{Context, Result};

/// Run `SELECT 1` through the proxy at `url`.
pub async fn execute(url: &str, retry: bool) -> Result<()> {
    let client = super::client(url, retry)?;
    client
        .ping()
        .await
        .with_context(|| format!("Proxy at {url} is not ready"))?;

    println!("Proxy at {url} is ready");
    Ok(())
}
