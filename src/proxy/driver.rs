//! Driver traits the proxy delegates SQL execution to.
//!
//! A [`Connector`] produces live [`Connection`]s. The proxy holds at most
//! one connection at a time and never hands it out to callers.
//!
//! # Example
//!
//! ```ignore
//! use sqlrelay::proxy::{Connector, QueryProxy};
//!
//! struct MyConnector;
//! impl Connector for MyConnector { /* ... */ }
//!
//! let proxy = QueryProxy::new(Arc::new(MyConnector), Duration::from_secs(5));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::types::DriverOutput;
use crate::error::DriverError;

/// Opens database connections.
///
/// Implementations must be thread-safe (`Send + Sync`) because the proxy
/// calls them from a background task.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establishes a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached or rejects the
    /// credentials.
    async fn connect(&self) -> Result<Arc<dyn Connection>, DriverError>;
}

/// A single live database connection.
///
/// `query` may be called concurrently; implementations serialize or
/// pipeline statements over the one connection as the driver allows.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Executes `text` with positional `params` and returns the raw output.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails. Errors that leave the
    /// connection unusable set [`DriverError::connection_lost`].
    async fn query(&self, text: &str, params: &[Value]) -> Result<DriverOutput, DriverError>;

    /// Closes the connection, waiting for in-flight statements.
    ///
    /// The proxy bounds this wait and calls [`abort`](Self::abort) when it
    /// runs out.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection terminated abnormally.
    async fn close(&self) -> Result<(), DriverError>;

    /// Tears the connection down without waiting. In-flight statements fail.
    fn abort(&self) {}
}
