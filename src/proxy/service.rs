//! The query proxy: one database connection and its lifecycle.
//!
//! [`QueryProxy`] is a cheap, clonable handle. Clones share the same
//! connection state, so the HTTP layer can hold one per handler while the
//! binary keeps another to drive startup and shutdown.
//!
//! ## States
//!
//! - **Disconnected**: no connection; queries are rejected with
//!   [`ProxyError::ServiceUnavailable`] and never reach the driver.
//! - **Connected**: queries are forwarded to the held connection.
//!
//! A failed connect leaves the proxy disconnected and the connect loop
//! tries again after a fixed delay, forever. Shutdown closes the
//! connection and stops the loop for good. The close waits at most
//! `close_timeout` for in-flight statements, then aborts the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::driver::{Connection, Connector};
use super::types::{QueryRequest, QueryResult};
use crate::constants;
use crate::error::{ProxyError, Result};
use crate::metrics;

/// Observable readiness of the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

enum ConnectionState {
    Disconnected,
    Connected(Arc<dyn Connection>),
}

impl ConnectionState {
    const fn status(&self) -> ConnectionStatus {
        match self {
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Connected(_) => ConnectionStatus::Connected,
        }
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    close_timeout: Duration,
    state: RwLock<ConnectionState>,
    status_tx: watch::Sender<ConnectionStatus>,
    connect_loop: Mutex<Option<AbortHandle>>,
    /// Only written while holding `state`.
    shutting_down: AtomicBool,
}

/// Handle to the query proxy.
#[derive(Clone)]
pub struct QueryProxy {
    inner: Arc<Inner>,
}

impl QueryProxy {
    /// Creates a disconnected proxy. Call [`spawn_connect_loop`](Self::spawn_connect_loop)
    /// to start connecting.
    pub fn new(connector: Arc<dyn Connector>, reconnect_delay: Duration) -> Self {
        Self::with_timeouts(connector, reconnect_delay, constants::close_timeout())
    }

    /// Like [`new`](Self::new), with an explicit bound on how long
    /// [`shutdown`](Self::shutdown) waits for the connection to close.
    pub fn with_timeouts(
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
        close_timeout: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                reconnect_delay,
                close_timeout,
                state: RwLock::new(ConnectionState::Disconnected),
                status_tx,
                connect_loop: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.read().status()
    }

    /// Receiver that observes every status transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Delay between failed connection attempts.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.inner.reconnect_delay
    }

    /// Makes a single connection attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ConnectFailed`] if the driver cannot connect or
    /// the proxy is shutting down. The status stays `Disconnected`.
    pub async fn connect(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(ProxyError::ConnectFailed("proxy is shutting down".to_string()));
        }

        info!("Attempting database connection");
        let connection = match self.inner.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                metrics::record_connect_attempt(false);
                error!(error = %e, "Database connection error");
                return Err(ProxyError::ConnectFailed(e.message));
            },
        };
        metrics::record_connect_attempt(true);

        {
            let mut state = self.inner.state.write();
            if !self.is_shutting_down() {
                *state = ConnectionState::Connected(connection);
                self.publish(ConnectionStatus::Connected);
                info!("Successfully connected to database");
                return Ok(());
            }
        }

        // Shutdown won the race; don't leak the fresh connection.
        if let Err(e) = connection.close().await {
            warn!(error = %e, "Failed to close connection opened during shutdown");
        }
        Err(ProxyError::ConnectFailed("proxy is shutting down".to_string()))
    }

    /// Starts the background connect loop.
    ///
    /// The loop retries every `reconnect_delay` until a connection is
    /// established; there is no attempt limit. Returns `None` if a loop is
    /// already running or the proxy is shutting down.
    pub fn spawn_connect_loop(&self) -> Option<JoinHandle<()>> {
        let mut slot = self.inner.connect_loop.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Connect loop already running");
            return None;
        }
        if self.is_shutting_down() {
            return None;
        }

        let proxy = self.clone();
        let handle = tokio::spawn(async move { proxy.run_connect_loop().await });
        *slot = Some(handle.abort_handle());
        Some(handle)
    }

    async fn run_connect_loop(&self) {
        let delay = self.inner.reconnect_delay;
        let mut attempt = 0u32;

        loop {
            if self.is_shutting_down() || self.status() == ConnectionStatus::Connected {
                return;
            }

            attempt += 1;
            match self.connect().await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(attempts = attempt, "Database connection established after retries");
                    }
                    return;
                },
                Err(_) if self.is_shutting_down() => return,
                Err(_) => {
                    warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Database connection failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    /// Executes a statement on the held connection.
    ///
    /// Every call is logged with its text and parameters before execution
    /// and with its outcome after.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::BadRequest`] if the text is absent or empty
    /// - [`ProxyError::ServiceUnavailable`] if the proxy is disconnected
    /// - [`ProxyError::QueryFailed`] if the driver rejects the statement
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryResult> {
        info!(text = ?request.text, params = ?request.params(), "Received query request");

        let result = self.execute_inner(request).await;
        match &result {
            Ok(result) => {
                metrics::record_query("success");
                info!(row_count = result.row_count, "Query executed successfully");
            },
            Err(e) => metrics::record_query(e.kind()),
        }
        result
    }

    async fn execute_inner(&self, request: &QueryRequest) -> Result<QueryResult> {
        let Some(text) = request.statement() else {
            warn!("Rejecting query without text");
            return Err(ProxyError::BadRequest);
        };

        let Some(connection) = self.connection() else {
            warn!("Database not connected, rejecting query");
            return Err(ProxyError::ServiceUnavailable);
        };

        match connection.query(text, request.params()).await {
            Ok(output) => Ok(output.into()),
            Err(e) => {
                error!(error = %e, connection_lost = e.connection_lost, "Database query error");
                if e.connection_lost {
                    self.handle_connection_lost(&connection);
                }
                Err(e.into())
            },
        }
    }

    /// Closes the connection and stops reconnecting.
    ///
    /// Safe to call more than once; later calls find nothing to close.
    /// Close errors are logged, not returned. A close still waiting on
    /// in-flight statements after `close_timeout` is abandoned and the
    /// connection aborted.
    pub async fn shutdown(&self) {
        let previous = {
            let mut state = self.inner.state.write();
            self.inner.shutting_down.store(true, Ordering::SeqCst);
            let previous = std::mem::replace(&mut *state, ConnectionState::Disconnected);
            self.publish(ConnectionStatus::Disconnected);
            previous
        };

        if let Some(handle) = self.inner.connect_loop.lock().take() {
            handle.abort();
        }

        match previous {
            ConnectionState::Connected(connection) => {
                let timeout = self.inner.close_timeout;
                match tokio::time::timeout(timeout, connection.close()).await {
                    Ok(Ok(())) => info!("Database connection closed"),
                    Ok(Err(e)) => error!(error = %e, "Error closing database connection"),
                    Err(_) => {
                        warn!(
                            timeout_secs = timeout.as_secs(),
                            "Database connection close timed out, forcefully closing"
                        );
                        connection.abort();
                    },
                }
            },
            ConnectionState::Disconnected => {
                debug!("Shutdown with no open database connection");
            },
        }
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        match &*self.inner.state.read() {
            ConnectionState::Connected(connection) => Some(Arc::clone(connection)),
            ConnectionState::Disconnected => None,
        }
    }

    /// Drops `failed` if it is still the current connection and reconnects.
    fn handle_connection_lost(&self, failed: &Arc<dyn Connection>) {
        {
            let mut state = self.inner.state.write();
            let is_current = matches!(
                &*state,
                ConnectionState::Connected(current)
                    if std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(failed))
            );
            if !is_current {
                return;
            }
            *state = ConnectionState::Disconnected;
            self.publish(ConnectionStatus::Disconnected);
        }

        warn!("Database connection lost, reconnecting");
        self.spawn_connect_loop();
    }

    /// Must be called with the state lock held so observers see transitions in order.
    fn publish(&self, status: ConnectionStatus) {
        self.inner.status_tx.send_replace(status);
        metrics::set_database_connected(status == ConnectionStatus::Connected);
    }
}
