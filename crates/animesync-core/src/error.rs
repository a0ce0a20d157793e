//! Error types for animesync
//!
//! This module defines all error types used throughout the crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for animesync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for animesync
#[derive(Error, Debug)]
pub enum Error {
    /// The remote service could not be reached
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote service refused a request
    #[error("Remote rejected request ({service}): {message}")]
    RemoteRejected {
        /// Service identifier (e.g. "anilist")
        service: String,
        /// Error message
        message: String,
    },

    /// A persisted cache entry could not be read back
    #[error("Cache entry corrupt: {0}")]
    CacheCorrupt(String),

    /// Persisting a store failed; the previous state was kept
    #[error("Store write failed: {0}")]
    StoreWriteFailed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`Error`]
///
/// Carried by [`crate::model::SyncResult`] so reports can be produced
/// without holding on to the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkUnavailable,
    RemoteRejected,
    CacheCorrupt,
    StoreWriteFailed,
    Config,
    Other,
}

impl Error {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkUnavailable(msg.into())
    }

    /// Create a rejection error for a service
    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteRejected {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a cache corruption error
    pub fn cache_corrupt(msg: impl Into<String>) -> Self {
        Self::CacheCorrupt(msg.into())
    }

    /// Create a store write error
    pub fn store_write(msg: impl Into<String>) -> Self {
        Self::StoreWriteFailed(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
            Self::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            Self::CacheCorrupt(_) | Self::Json(_) => ErrorKind::CacheCorrupt,
            Self::StoreWriteFailed(_) | Self::Io(_) => ErrorKind::StoreWriteFailed,
            Self::Config(_) => ErrorKind::Config,
            Self::InvalidState(_) | Self::NotFound(_) | Self::Other(_) => ErrorKind::Other,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
