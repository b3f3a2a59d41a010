//! Error types and wire codes for switchyard

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code for malformed envelopes and unknown routes
pub const BAD_REQUEST: u16 = 400;
/// Code for control messages addressed to an unknown channel
pub const NOT_FOUND: u16 = 404;
/// Code for uncaught method failures
pub const INTERNAL_ERROR: u16 = 500;

/// Message sent in place of any error that carries a local diagnostic
const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

/// Error produced by a call: a hook, a method, or the protocol layer itself.
///
/// Only `code` and `message` ever reach the client. `diagnostic` holds local detail
/// (an error chain, a backtrace) that is logged and then dropped by [`RpcError::to_wire`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: u16,
    pub message: String,
    pub diagnostic: Option<String>,
}

impl RpcError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            diagnostic: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(NOT_FOUND, message)
    }

    /// An uncaught failure with local detail that must not be sent to the client
    pub fn internal(diagnostic: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: GENERIC_INTERNAL_MESSAGE.to_string(),
            diagnostic: Some(diagnostic.into()),
        }
    }

    /// Attach local diagnostic detail to an existing error
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    /// Reduce the error to what may be transmitted.
    ///
    /// Errors carrying a diagnostic are logged here and replaced with a generic 500.
    pub fn to_wire(&self) -> WireError {
        match &self.diagnostic {
            Some(diagnostic) => {
                tracing::error!(
                    code = self.code,
                    "Call failed: {}\n{}",
                    self.message,
                    diagnostic
                );
                WireError {
                    code: INTERNAL_ERROR,
                    message: GENERIC_INTERNAL_MESSAGE.to_string(),
                }
            }
            None => WireError {
                code: self.code,
                message: self.message.clone(),
            },
        }
    }
}

impl From<anyhow::Error> for RpcError {
    fn from(err: anyhow::Error) -> Self {
        RpcError::internal(format!("{:?}", err))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::bad_request(format!("Could not parse message data: {}", err))
    }
}

/// The `data` of an `error` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: u16,
    pub message: String,
}

/// Configuration-time errors raised while building services and the registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("There is already a service registered with the name \"{name}\"")]
    DuplicateService { name: String },

    #[error("There is already a \"{service}\" method called \"{method}\"")]
    DuplicateMethod { service: String, method: String },

    #[error("Attempting to hook unregistered method \"{method}\"")]
    UnregisteredHook { method: String },
}

/// Errors loading server configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config: {message}")]
    Invalid { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for call-level operations
pub type Result<T> = std::result::Result<T, RpcError>;
