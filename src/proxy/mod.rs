//! SQL query proxy with a pluggable database driver.
//!
//! The proxy owns exactly one database connection and exposes a single
//! operation: execute a statement and return a normalized result.
//!
//! # Example
//!
//! ```ignore
//! use sqlrelay::proxy::{PostgresConnector, QueryProxy, QueryRequest};
//!
//! let connector = PostgresConnector::new(&config.database)?;
//! let proxy = QueryProxy::new(Arc::new(connector), config.database.reconnect_delay());
//! proxy.spawn_connect_loop();
//!
//! let result = proxy.execute(&QueryRequest::new("SELECT 1")).await?;
//! ```
//!
//! # Custom Drivers
//!
//! Implement [`Connector`] and [`Connection`] to put the proxy in front of
//! something other than PostgreSQL.

mod driver;
mod postgres;
mod service;
mod types;

// Re-export the public API
pub use driver::{Connection, Connector};
pub use postgres::{PostgresConnection, PostgresConnector};
pub use service::{ConnectionStatus, QueryProxy};
pub use types::{DriverOutput, Field, QueryRequest, QueryResult, Row};
