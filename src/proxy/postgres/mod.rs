//! PostgreSQL driver built on `tokio-postgres`.
//!
//! TLS is negotiated with `native-tls` and server certificates are not
//! validated, which is what managed cloud databases with self-signed
//! chains need.
//!
//! Statements go through the extended protocol so parameters bind with
//! their server-side types. Text holding several statements cannot be
//! prepared; without parameters it falls back to the simple protocol and
//! reports the last statement's result.

mod numeric;
mod params;
mod rows;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::Mutex;
use postgres_native_tls::MakeTlsConnector;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use tracing::{debug, error, warn};

use self::params::JsonParam;
use super::driver::{Connection, Connector};
use super::types::{DriverOutput, Row};
use crate::config::DatabaseConfig;
use crate::error::DriverError;

type ConnectionTask = JoinHandle<std::result::Result<(), tokio_postgres::Error>>;

/// Opens connections to a single PostgreSQL server.
pub struct PostgresConnector {
    config: Config,
    tls: Option<MakeTlsConnector>,
}

impl PostgresConnector {
    /// Builds a connector from database settings. A connection URL, when
    /// set, replaces the individual settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or the TLS connector cannot
    /// be created.
    pub fn new(database: &DatabaseConfig) -> Result<Self> {
        if let Some(url) = &database.url {
            return Self::from_url(url);
        }

        let mut config = Config::new();
        config
            .host(&database.host)
            .port(database.port)
            .dbname(&database.name)
            .user(&database.user)
            .password(&database.password)
            .application_name(env!("CARGO_PKG_NAME"));

        let tls = if database.tls {
            config.ssl_mode(SslMode::Require);
            Some(tls_connector()?)
        } else {
            config.ssl_mode(SslMode::Disable);
            None
        };

        Ok(Self { config, tls })
    }

    /// Builds a connector from a `postgres://` URL or key-value string.
    ///
    /// TLS follows the URL's `sslmode`: `disable` connects in clear text,
    /// anything else offers TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or the TLS connector cannot
    /// be created.
    pub fn from_url(url: &str) -> Result<Self> {
        let mut config: Config = url.parse().context("Invalid database URL")?;
        if config.get_application_name().is_none() {
            config.application_name(env!("CARGO_PKG_NAME"));
        }

        let tls = match config.get_ssl_mode() {
            SslMode::Disable => None,
            _ => Some(tls_connector()?),
        };

        Ok(Self { config, tls })
    }
}

fn tls_connector() -> Result<MakeTlsConnector> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .context("Failed to build TLS connector")?;
    Ok(MakeTlsConnector::new(connector))
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self) -> std::result::Result<Arc<dyn Connection>, DriverError> {
        let (client, task) = match &self.tls {
            Some(tls) => {
                let (client, connection) = self
                    .config
                    .connect(tls.clone())
                    .await
                    .map_err(driver_error)?;
                (client, spawn_connection(connection))
            },
            None => {
                let (client, connection) =
                    self.config.connect(NoTls).await.map_err(driver_error)?;
                (client, spawn_connection(connection))
            },
        };

        Ok(Arc::new(PostgresConnection {
            client: RwLock::new(Some(client)),
            abort: task.abort_handle(),
            task: Mutex::new(Some(task)),
        }))
    }
}

/// Drives the socket until the client is dropped or the server goes away.
fn spawn_connection<S, T>(connection: tokio_postgres::Connection<S, T>) -> ConnectionTask
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let result = connection.await;
        match &result {
            Ok(()) => debug!("Database connection task finished"),
            Err(e) => error!(error = %e, "Database connection terminated"),
        }
        result
    })
}

/// One live PostgreSQL session.
///
/// `tokio_postgres::Client` pipelines concurrent statements over the
/// socket, so queries only take the read side of the lock; `close` takes
/// the write side and therefore waits for in-flight statements.
pub struct PostgresConnection {
    client: RwLock<Option<Client>>,
    task: Mutex<Option<ConnectionTask>>,
    abort: AbortHandle,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn query(
        &self,
        text: &str,
        params: &[Value],
    ) -> std::result::Result<DriverOutput, DriverError> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| DriverError::connection_lost("connection is closed"))?;

        let statement = match client.prepare(text).await {
            Ok(statement) => statement,
            Err(e) if params.is_empty() && is_multiple_commands(&e) => {
                debug!("Statement text holds several commands, using the simple protocol");
                return simple_query(client, text).await;
            },
            Err(e) => return Err(driver_error(e)),
        };
        let fields = statement.columns().iter().map(rows::field).collect();

        let params: Vec<JsonParam<'_>> = params.iter().map(JsonParam).collect();
        let stream = client
            .query_raw(&statement, params.iter())
            .await
            .map_err(driver_error)?;
        futures::pin_mut!(stream);

        let mut result_rows = Vec::new();
        while let Some(row) = stream.try_next().await.map_err(driver_error)? {
            result_rows.push(rows::row_to_json(&row).map_err(driver_error)?);
        }
        let row_count = stream
            .rows_affected()
            .unwrap_or(result_rows.len() as u64);

        Ok(DriverOutput {
            rows: Some(result_rows),
            row_count: Some(row_count),
            fields: Some(fields),
        })
    }

    async fn close(&self) -> std::result::Result<(), DriverError> {
        // Dropping the client makes the connection task send Terminate and exit.
        drop(self.client.write().await.take());

        let Some(task) = self.task.lock().take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result.map_err(driver_error),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(DriverError::new(format!("connection task failed: {e}"))),
        }
    }

    fn abort(&self) {
        warn!("Aborting database connection with statements in flight");
        self.abort.abort();
    }
}

/// The server refuses to prepare text with more than one statement.
fn is_multiple_commands(err: &tokio_postgres::Error) -> bool {
    err.as_db_error().is_some_and(|db| {
        *db.code() == SqlState::SYNTAX_ERROR && db.message().contains("multiple commands")
    })
}

/// Runs `text` over the simple protocol and reports the last statement's
/// rows and count. Values arrive as text, so every field is `text`.
async fn simple_query(
    client: &Client,
    text: &str,
) -> std::result::Result<DriverOutput, DriverError> {
    let messages = client.simple_query(text).await.map_err(driver_error)?;

    let mut output = DriverOutput::default();
    let mut result_rows = Vec::new();
    let mut fields = Vec::new();
    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(columns) => {
                fields = columns.iter().map(|c| rows::text_field(c.name())).collect();
            },
            SimpleQueryMessage::Row(row) => {
                if fields.is_empty() {
                    fields = row
                        .columns()
                        .iter()
                        .map(|c| rows::text_field(c.name()))
                        .collect();
                }
                let mut map = Row::new();
                for (index, column) in row.columns().iter().enumerate() {
                    map.insert(
                        column.name().to_string(),
                        row.get(index).map_or(Value::Null, Value::from),
                    );
                }
                result_rows.push(map);
            },
            SimpleQueryMessage::CommandComplete(count) => {
                output = DriverOutput {
                    rows: Some(std::mem::take(&mut result_rows)),
                    row_count: Some(count),
                    fields: Some(std::mem::take(&mut fields)),
                };
            },
            _ => {},
        }
    }
    Ok(output)
}

/// Prefers the server's own message so callers see e.g. `relation "x" does not exist`.
/// A `FATAL` or `PANIC` error means the backend is gone.
fn driver_error(err: tokio_postgres::Error) -> DriverError {
    let (message, fatal) = match err.as_db_error() {
        Some(db) => (
            db.message().to_string(),
            matches!(db.severity(), "FATAL" | "PANIC"),
        ),
        None => (err.to_string(), false),
    };
    DriverError {
        message,
        connection_lost: fatal || err.is_closed(),
    }
}
