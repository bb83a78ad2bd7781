//! Shared test infrastructure for sqlrelay integration tests.
//!
//! - [`MockConnector`] / [`MockConnection`] - scripted database driver
//! - [`MockTransport`] - scripted client transport
//! - [`TestHost`] - the real HTTP server on an ephemeral port

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{RwLock, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use sqlrelay::client::{ClientError, QueryTransport};
use sqlrelay::error::DriverError;
use sqlrelay::http::{self, AppState};
use sqlrelay::proxy::{
    Connection, ConnectionStatus, Connector, DriverOutput, Field, QueryProxy, QueryRequest,
    QueryResult,
};

// =============================================================================
// Mock Driver
// =============================================================================

/// One call to [`MockConnector::connect`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectAttempt {
    pub at: Instant,
    /// Proxy status seen at the moment of the attempt.
    pub status: Option<ConnectionStatus>,
}

/// Connector whose attempts fail according to a script.
pub struct MockConnector {
    failures: Mutex<VecDeque<String>>,
    fail_forever: bool,
    attempts: Mutex<Vec<ConnectAttempt>>,
    observer: Mutex<Option<watch::Receiver<ConnectionStatus>>>,
    connection: Arc<MockConnection>,
}

impl MockConnector {
    /// A connector that always succeeds.
    pub fn new() -> Arc<Self> {
        Self::failing_times(0)
    }

    /// Fails the first `n` attempts, then succeeds.
    pub fn failing_times(n: usize) -> Arc<Self> {
        Self::build(n, false, MockConnection::new())
    }

    /// Never succeeds.
    pub fn unreachable() -> Arc<Self> {
        Self::build(0, true, MockConnection::new())
    }

    /// Always succeeds, handing out `connection`.
    pub fn with_connection(connection: Arc<MockConnection>) -> Arc<Self> {
        Self::build(0, false, connection)
    }

    fn build(failures: usize, fail_forever: bool, connection: Arc<MockConnection>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(
                (1..=failures)
                    .map(|i| format!("connection refused (attempt {i})"))
                    .collect(),
            ),
            fail_forever,
            attempts: Mutex::new(Vec::new()),
            observer: Mutex::new(None),
            connection,
        })
    }

    /// Record the proxy status at every attempt.
    pub fn observe(&self, proxy: &QueryProxy) {
        *self.observer.lock() = Some(proxy.subscribe());
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn connection(&self) -> &Arc<MockConnection> {
        &self.connection
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn Connection>, DriverError> {
        let status = self.observer.lock().as_ref().map(|rx| *rx.borrow());
        self.attempts.lock().push(ConnectAttempt {
            at: Instant::now(),
            status,
        });

        if self.fail_forever {
            return Err(DriverError::new("connection refused"));
        }
        if let Some(message) = self.failures.lock().pop_front() {
            return Err(DriverError::new(message));
        }
        let connection: Arc<dyn Connection> = self.connection.clone();
        Ok(connection)
    }
}

/// Connection that answers from a script, then with the `SELECT 1` output.
///
/// Like the real driver, queries hold the read side of a lock and `close`
/// takes the write side, so a close waits for in-flight queries.
pub struct MockConnection {
    responses: Mutex<VecDeque<Result<DriverOutput, DriverError>>>,
    queries: Mutex<Vec<(String, Vec<Value>)>>,
    in_flight: RwLock<()>,
    close_calls: AtomicUsize,
    close_error: Option<String>,
    hang: bool,
    aborted: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Self::build(None, false)
    }

    /// A connection whose `close` fails with `message`.
    pub fn failing_close(message: &str) -> Arc<Self> {
        Self::build(Some(message.to_string()), false)
    }

    /// A connection whose queries never finish.
    pub fn hanging() -> Arc<Self> {
        Self::build(None, true)
    }

    fn build(close_error: Option<String>, hang: bool) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            in_flight: RwLock::new(()),
            close_calls: AtomicUsize::new(0),
            close_error,
            hang,
            aborted: AtomicBool::new(false),
        })
    }

    /// Queue the outcome of the next query.
    pub fn push_response(&self, response: Result<DriverOutput, DriverError>) {
        self.responses.lock().push_back(response);
    }

    pub fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.queries.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, text: &str, params: &[Value]) -> Result<DriverOutput, DriverError> {
        let _guard = self.in_flight.read().await;
        self.queries
            .lock()
            .push((text.to_string(), params.to_vec()));
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(select_one_output()))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.in_flight.write().await;
        match &self.close_error {
            Some(message) => Err(DriverError::new(message.clone())),
            None => Ok(()),
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

/// What PostgreSQL returns for `SELECT 1`.
pub fn select_one_output() -> DriverOutput {
    DriverOutput {
        rows: Some(vec![
            json!({ "?column?": 1 })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        ]),
        row_count: Some(1),
        fields: Some(vec![Field {
            name: "?column?".to_string(),
            data_type_id: 23,
            data_type_name: "int4".to_string(),
            table_id: None,
            column_id: None,
        }]),
    }
}

/// Proxy over `connector` with the given reconnect delay.
pub fn proxy_with(connector: &Arc<MockConnector>, delay: Duration) -> QueryProxy {
    let proxy = QueryProxy::new(connector.clone(), delay);
    connector.observe(&proxy);
    proxy
}

/// A proxy that is already connected.
pub async fn connected_proxy() -> (QueryProxy, Arc<MockConnector>) {
    let connector = MockConnector::new();
    let proxy = proxy_with(&connector, Duration::from_secs(5));
    proxy.connect().await.expect("mock connect");
    (proxy, connector)
}

// =============================================================================
// Mock Transport
// =============================================================================

/// Transport that replays scripted outcomes and records call times.
#[derive(Default)]
pub struct MockTransport {
    outcomes: Mutex<VecDeque<Result<QueryResult, ClientError>>>,
    calls: Mutex<Vec<(Instant, QueryRequest)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `n` failures with the given status.
    pub fn fail_times(&self, n: usize, status: u16) {
        let mut outcomes = self.outcomes.lock();
        for _ in 0..n {
            outcomes.push_back(Err(ClientError::Status {
                status,
                message: "Database connection not ready".to_string(),
            }));
        }
    }

    pub fn succeed_with(&self, result: QueryResult) {
        self.outcomes.lock().push_back(Ok(result));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.calls
            .lock()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Gaps between consecutive calls.
    pub fn waits(&self) -> Vec<Duration> {
        self.call_times()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }
}

#[async_trait]
impl QueryTransport for MockTransport {
    async fn send(&self, request: &QueryRequest) -> Result<QueryResult, ClientError> {
        self.calls.lock().push((Instant::now(), request.clone()));
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResult::default()))
    }
}

// =============================================================================
// Test Host
// =============================================================================

/// Builder for [`TestHost`].
pub struct TestHostBuilder {
    proxy: Option<QueryProxy>,
    metrics: Option<PrometheusHandle>,
    drain_timeout: Duration,
}

impl TestHostBuilder {
    pub fn with_proxy(mut self, proxy: QueryProxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Bind to `127.0.0.1:0` and start serving in the background.
    pub async fn start(self) -> anyhow::Result<TestHost> {
        let proxy = match self.proxy {
            Some(proxy) => proxy,
            None => proxy_with(&MockConnector::new(), Duration::from_secs(5)),
        };

        let mut state = AppState::new(proxy.clone());
        if let Some(handle) = self.metrics {
            state = state.with_metrics(handle);
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(http::serve(
            listener,
            state,
            async move {
                let _ = shutdown_rx.await;
            },
            self.drain_timeout,
        ));

        Ok(TestHost {
            addr,
            client: reqwest::Client::new(),
            proxy,
            shutdown: Some(shutdown_tx),
            server: Some(server),
        })
    }
}

/// A running HTTP server backed by a mock driver.
pub struct TestHost {
    addr: SocketAddr,
    client: reqwest::Client,
    proxy: QueryProxy,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestHost {
    pub fn builder() -> TestHostBuilder {
        TestHostBuilder {
            proxy: None,
            metrics: None,
            drain_timeout: Duration::from_secs(5),
        }
    }

    /// Signal shutdown and wait for the server to return.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.server.take() {
            Some(server) => server.await?,
            None => Ok(()),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn proxy(&self) -> &QueryProxy {
        &self.proxy
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(self.url(path)).send().await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Result<reqwest::Response> {
        self.client.post(self.url(path)).json(body).send().await
    }

    pub async fn post_raw(&self, path: &str, body: &'static str) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(self.url(path))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
