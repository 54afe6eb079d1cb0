//! Core error types for launchgate-core.
//!
//! This module defines the error hierarchy using thiserror. None of these
//! errors ever reach the presentation layer: the orchestrator recovers every
//! failure locally by falling back to a cached endpoint or to the fallback flow.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for launchgate-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Remote resolution / validation errors
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Storage-tier errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Failures of the outbound network calls and the remote validation check.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// The request URL could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Non-2xx HTTP status
    #[error("Server responded with HTTP {status}")]
    Server { status: u16 },

    /// Malformed or unexpected response body
    #[error("Unexpected response body: {0}")]
    Decoding(String),

    /// Underlying network failure
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Remote check returned false
    #[error("Deployment validation denied")]
    ValidationDenied,

    /// Global deadline reached
    #[error("Launch deadline of {secs}s reached")]
    Timeout { secs: f64 },
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ResolveError::Decoding(err.to_string())
        } else if err.is_builder() {
            ResolveError::InvalidUrl(err.to_string())
        } else {
            ResolveError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for ResolveError {
    fn from(err: url::ParseError) -> Self {
        ResolveError::InvalidUrl(err.to_string())
    }
}

/// Storage-tier errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the primary database
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Store is locked")]
    Locked,

    /// OS keyring failure
    #[error("Keyring error: {0}")]
    Keyring(String),

    /// Lock poisoned by a panicking writer
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<keyring::Error> for StoreError {
    fn from(err: keyring::Error) -> Self {
        StoreError::Keyring(err.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CoreError::Custom(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
