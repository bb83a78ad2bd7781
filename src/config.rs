//! Configuration for the sqlrelay proxy.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables, so a container can run without any file at all:
//!
//! - [`ProxyConfig`] - Root configuration struct
//! - [`ServerConfig`] - HTTP listener settings
//! - [`DatabaseConfig`] - PostgreSQL connection settings
//! - [`LoggingConfig`] - Log output format
//! - [`MetricsConfig`] - Prometheus exporter toggle
//!
//! Database settings accept both the `DB_*` variables and the legacy
//! `VITE_AZURE_DB_*` names. `DATABASE_URL` replaces all of them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::constants;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds in-flight requests get to finish after a shutdown signal.
    pub drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_HOST.to_string(),
            port: constants::DEFAULT_PORT,
            drain_timeout_secs: constants::DRAIN_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Socket address to bind the HTTP listener to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid IPv4 or IPv6 address.
    /// IPv6 addresses may be bracketed.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = host
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// PostgreSQL connection settings.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection URL. When set, the individual settings below are ignored.
    pub url: Option<String>,
    pub host: String,
    pub name: String,
    pub user: String,
    pub password: String,
    pub port: u16,
    /// Use TLS for the database connection. Certificates are not validated.
    pub tls: bool,
    /// Seconds to wait between failed connection attempts.
    pub reconnect_delay_secs: u64,
    /// Seconds shutdown waits for in-flight statements before aborting.
    pub close_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: String::new(),
            name: String::new(),
            user: String::new(),
            password: String::new(),
            port: constants::DEFAULT_DB_PORT,
            tls: true,
            reconnect_delay_secs: constants::RECONNECT_DELAY_SECS,
            close_timeout_secs: constants::CLOSE_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    /// Delay between failed connection attempts.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("close_timeout_secs", &self.close_timeout_secs)
            .finish()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unknown log format '{other}' (expected 'pretty' or 'json')"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl ProxyConfig {
    /// Load configuration from an optional file, then apply the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// environment variable holds a malformed value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from the specified TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - A field has an invalid type or is unknown
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ProxyConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Override settings from environment variables.
    ///
    /// `lookup` resolves a variable name to its value, which keeps this
    /// testable without touching the real process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or enumerated variable cannot be parsed.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key));

        if let Some(host) = first(&["HOST"]) {
            self.server.host = host;
        }
        if let Some(port) = first(&["PORT"]) {
            self.server.port = port
                .parse()
                .with_context(|| format!("PORT must be a port number (got: '{port}')"))?;
        }

        if let Some(url) = first(&["DATABASE_URL"]) {
            self.database.url = Some(url);
        }
        if let Some(host) = first(&["DB_HOST", "VITE_AZURE_DB_HOST"]) {
            self.database.host = host;
        }
        if let Some(name) = first(&["DB_NAME", "VITE_AZURE_DB_NAME"]) {
            self.database.name = name;
        }
        if let Some(user) = first(&["DB_USER", "VITE_AZURE_DB_USER"]) {
            self.database.user = user;
        }
        if let Some(password) = first(&["DB_PASSWORD", "VITE_AZURE_DB_PASSWORD"]) {
            self.database.password = password;
        }
        if let Some(tls) = first(&["DB_TLS"]) {
            self.database.tls = parse_bool(&tls)
                .with_context(|| format!("DB_TLS must be a boolean (got: '{tls}')"))?;
        }

        if let Some(format) = first(&["LOG_FORMAT"]) {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    /// Validate configuration.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error listing every problem found:
    /// - Malformed database URL
    /// - Missing database host, name, or user when no URL is set
    /// - Zero database port
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match &self.database.url {
            Some(url) => {
                if let Err(e) = url.parse::<tokio_postgres::Config>() {
                    errors.push(format!("database.url is invalid: {e}"));
                }
            },
            None => {
                if self.database.host.is_empty() {
                    errors.push("database.host is required (set DB_HOST)".to_string());
                }
                if self.database.name.is_empty() {
                    errors.push("database.name is required (set DB_NAME)".to_string());
                }
                if self.database.user.is_empty() {
                    errors.push("database.user is required (set DB_USER)".to_string());
                }
                if self.database.port == 0 {
                    errors.push("database.port cannot be 0".to_string());
                }

                if self.database.password.is_empty() {
                    warnings.push("database.password is empty".to_string());
                }
                if !self.database.tls {
                    warnings.push(
                        "database TLS is disabled; traffic is sent in clear text".to_string(),
                    );
                }
            },
        }
        if self.database.reconnect_delay_secs == 0 {
            warnings.push(
                "database.reconnect_delay_secs is 0; failed connects will retry in a tight loop"
                    .to_string(),
            );
        }

        if self.database.close_timeout_secs == 0 {
            warnings.push(
                "database.close_timeout_secs is 0; shutdown aborts in-flight statements".to_string(),
            );
        }

        if !errors.is_empty() {
            anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
        }

        Ok(ValidationResult { warnings })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
