//! Prometheus metrics for the proxy.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`install_prometheus`] sets up a recorder.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder and returns a handle for rendering.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Count one query with its outcome (`success` or an error kind).
pub fn record_query(outcome: &'static str) {
    counter!("sqlrelay_queries_total", "outcome" => outcome).increment(1);
}

/// Count one database connection attempt.
pub fn record_connect_attempt(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("sqlrelay_connect_attempts_total", "outcome" => outcome).increment(1);
}

/// Track whether the database connection is currently established.
pub fn set_database_connected(connected: bool) {
    gauge!("sqlrelay_database_connected").set(if connected { 1.0 } else { 0.0 });
}
