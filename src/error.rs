//! Error types for the persona engine.
//!
//! None of these escape the public tracking or inference operations; they
//! flow through internal helpers and are converted into safe defaults at the
//! boundary.

use thiserror::Error;

/// Failures of a [`KeyValueStore`](crate::storage::KeyValueStore) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend refused the write because it would exceed its capacity.
    #[error("storage quota exceeded: {needed} bytes requested, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    /// The backend cannot be reached or opened.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Persisted data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

/// A scoring rule could not evaluate its condition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("field '{0}' is not a finite number")]
    NonFinite(&'static str),

    #[error("field '{field}' is malformed: {reason}")]
    Malformed { field: &'static str, reason: String },
}

/// Failures raised inside an inference run before they are folded into the
/// fallback result.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("event log unreadable: {0}")]
    Storage(#[from] StorageError),

    #[error("score for {persona} is not finite")]
    NonFiniteScore { persona: &'static str },
}

/// Failures talking to the remote analytics/personalization endpoints.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
