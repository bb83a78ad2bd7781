//! HTTP API in front of the query proxy.
//!
//! # Endpoints
//!
//! | Method | Path         | Purpose                              |
//! |--------|--------------|--------------------------------------|
//! | POST   | `/api/query` | Execute a statement                  |
//! | GET    | `/health`    | Liveness and database status         |
//! | GET    | `/metrics`   | Prometheus metrics (when enabled)    |

mod error;
mod handlers;

use std::future::{Future, IntoFuture};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::{
    compression::CompressionLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info, warn};

pub use error::{AppError, ErrorBody};
pub use handlers::HealthResponse;

use crate::constants;
use crate::proxy::QueryProxy;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: QueryProxy,
    /// `None` when metrics are disabled.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(proxy: QueryProxy) -> Self {
        Self {
            proxy,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the router with request tracing and response compression.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(constants::QUERY_PATH, post(handlers::query))
        .route(constants::HEALTH_PATH, get(handlers::health))
        .route(constants::METRICS_PATH, get(handlers::metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves, then drain in-flight requests.
///
/// Returns once `drain_timeout` has passed after the signal, even if
/// requests are still running.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
    drain_timeout: Duration,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }

    let (draining_tx, draining_rx) = oneshot::channel();
    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = draining_tx.send(());
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result.context("HTTP server error"),
        _ = draining_rx => {},
    }

    match tokio::time::timeout(drain_timeout, server).await {
        Ok(result) => result.context("HTTP server error"),
        Err(_) => {
            warn!(
                timeout_secs = drain_timeout.as_secs(),
                "Request drain timed out, abandoning in-flight requests"
            );
            Ok(())
        },
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
