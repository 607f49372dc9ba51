//! Error types for the ztc crate.
//!
//! This module provides a single error type [`ZtcError`] covering all failure
//! modes in the library, so callers can match on what actually went wrong.

use std::io;

/// The main error type for all operations in this crate.
#[derive(Debug, thiserror::Error)]
pub enum ZtcError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Error returned by the Zabbix JSON-RPC API.
    ///
    /// Carries the server's `(code, message, data)` triple verbatim. The
    /// client never retries these internally.
    #[error("Zabbix API error {code}: {message} {data}")]
    ZabbixApi {
        /// JSON-RPC error code.
        code: i64,
        /// Short error message.
        message: String,
        /// Detailed error data from the server.
        data: String,
    },

    /// A requested Zabbix object (template, host, bulletin) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Vulners audit call failed for a host.
    #[error("vulners audit failed for {os}: {message}")]
    Audit {
        /// Normalized OS name the audit was requested for.
        os: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The zabbix_sender subprocess failed.
    #[error("zabbix_sender failed: {message}: {output}")]
    Sender {
        /// Description of the failure.
        message: String,
        /// Combined stdout+stderr of the subprocess, verbatim.
        output: String,
    },

    /// Input validation failed (host target, package name, SSH user).
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation was cancelled (signal or caller token).
    #[error("operation cancelled")]
    Cancelled,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (subprocess spawn, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Task join error (from spawned tasks).
    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// A specialized Result type for ztc operations.
pub type Result<T> = std::result::Result<T, ZtcError>;

impl ZtcError {
    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a new audit error.
    pub fn audit(os: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Audit {
            os: os.into(),
            message: message.into(),
        }
    }

    /// Create a new sender error.
    pub fn sender(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Sender {
            message: message.into(),
            output: output.into(),
        }
    }

    /// Create a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Check if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
