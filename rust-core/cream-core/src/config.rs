//! # Configuration
//!
//! `config.json` loading. Keys are camelCase; everything but the file
//! itself has a default.
//!
//! ```json
//! {
//!   "port": 8000,
//!   "basePath": "/api",
//!   "database": { "url": "sqlite:cream.db", "maxConnections": 5 }
//! }
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Database section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Connection URL; the scheme selects the backend
    pub url: String,
    /// Pool size
    #[serde(default)]
    pub max_connections: Option<u32>,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Listen port
    pub port: u16,
    /// Listen address
    pub host: IpAddr,
    /// Path prefix every route lives under
    pub base_path: String,
    /// Optional database; without it database kinds inject null
    pub database: Option<DatabaseConfig>,
    /// Request body limit in bytes
    pub max_body_size: usize,
    /// Connection drain limit on shutdown
    pub shutdown_timeout_secs: u64,
    /// Envelope code for a verb the route does not accept
    pub method_not_allowed_code: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: IpAddr::from([127, 0, 0, 1]),
            base_path: "/".to_string(),
            database: None,
            max_body_size: 1024 * 1024,
            shutdown_timeout_secs: 30,
            method_not_allowed_code: 503,
        }
    }
}

impl AppConfig {
    /// Read and parse a configuration file
    ///
    /// # Errors
    ///
    /// `Error::Config` naming the path when the file is missing or invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_error = |reason: String| Error::Config {
            path: path.display().to_string(),
            reason,
        };

        let text = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("cannot read file: {e}")))?;
        Self::from_json(&text).map_err(|e| match e {
            Error::Json(inner) => config_error(inner.to_string()),
            other => other,
        })
    }

    /// Parse configuration text
    ///
    /// # Errors
    ///
    /// `Error::Json` when the text is not a valid configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Socket address to bind
    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Shutdown drain limit
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
