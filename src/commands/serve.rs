//! Run the HTTP proxy.
//!
//! Startup never waits for the database: the listener binds immediately
//! and queries get `503` until the background connect loop succeeds.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use sqlrelay::config::ProxyConfig;
use sqlrelay::http::{self, AppState};
use sqlrelay::logging;
use sqlrelay::metrics;
use sqlrelay::proxy::{PostgresConnector, QueryProxy};

/// Serve until SIGINT or SIGTERM, then close the database connection.
///
/// Both the request drain and the close are bounded, so a hung statement
/// cannot keep the process alive.
pub async fn execute(config_path: Option<&Path>, port_override: Option<u16>) -> Result<()> {
    let mut config = ProxyConfig::load(config_path)?;
    if let Some(port) = port_override {
        config.server.port = port;
    }

    logging::init_tracing(config.logging.format);

    let validation = config.validate()?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let connector = PostgresConnector::new(&config.database)?;
    let proxy = QueryProxy::with_timeouts(
        Arc::new(connector),
        config.database.reconnect_delay(),
        config.database.close_timeout(),
    );

    let mut state = AppState::new(proxy.clone());
    if config.metrics.enabled {
        state = state.with_metrics(metrics::install_prometheus()?);
    }

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    if config.database.url.is_some() {
        info!("Starting sqlrelay with database URL");
    } else {
        info!(
            db_host = %config.database.host,
            db_name = %config.database.name,
            tls = config.database.tls,
            "Starting sqlrelay"
        );
    }
    proxy.spawn_connect_loop();

    let served = http::serve(
        listener,
        state,
        http::shutdown_signal(),
        config.server.drain_timeout(),
    )
    .await;

    proxy.shutdown().await;
    info!("Shutdown complete");
    served
}
