//! Server configuration
//!
//! Loaded from an optional TOML file; every field has a default so an empty file
//! (or no file) is valid. The daemon layers CLI flags on top.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 9850
//! result_encoding = "bare"
//! log_filter = "switchyard=debug"
//! outbound_capacity = 1024
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a plain-value `result` envelope carries its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultEncoding {
    /// `{"data": <value>}`
    #[default]
    Wrapped,
    /// `<value>`
    Bare,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Encoding of plain-value results; must be consistent within one deployment
    pub result_encoding: ResultEncoding,
    /// Default tracing directive used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Per-connection outbound queue length; channel events past it are dropped
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9850,
            result_encoding: ResultEncoding::Wrapped,
            log_filter: "switchyard=info".to_string(),
            outbound_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }

    /// Socket address to bind
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid {
                message: format!("bad bind address {}:{}: {}", self.host, self.port, e),
            })
    }
}
