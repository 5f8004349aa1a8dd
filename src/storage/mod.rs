//! Durable key-value persistence for the event log, session id and the
//! last known persona.
//!
//! The engine never talks to a concrete backend. Everything goes through
//! [`KeyValueStore`], so the same code runs against a file on disk, a
//! server-side cache, or the in-memory fake used by tests.

pub mod file;
pub mod memory;

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Key holding the JSON-serialized bounded event array.
pub const EVENTS_KEY: &str = "persona_tracking_events";

/// Key holding the generated session identifier (session-scoped store).
pub const SESSION_KEY: &str = "persona_session_id";

/// Key holding the last inferred persona.
pub const PERSONA_KEY: &str = "user_persona";

/// Lifetime of the persisted persona entry.
pub const PERSONA_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Capability interface over a per-origin key-value store.
///
/// Implementations use interior mutability so a single store can be shared
/// between the event log and the persona consumer.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Expired entries read as `None`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, optionally expiring after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Delete a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Thread-safe shared store handle.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// A stored value with its optional expiry, shared by the bundled backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    pub fn new(value: &str, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        Self {
            value: value.to_string(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Bytes this entry occupies against a quota.
    pub fn footprint(key: &str, value: &str) -> usize {
        key.len() + value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let now = Utc::now();
        let entry = StoredEntry::new("x", None, now);
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired(now + chrono::Duration::days(10_000)));
    }

    #[test]
    fn test_entry_expiry() {
        let now = Utc::now();
        let entry = StoredEntry::new("x", Some(Duration::from_secs(60)), now);
        assert!(!entry.is_expired(now + chrono::Duration::seconds(59)));
        assert!(entry.is_expired(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_persona_ttl_is_one_year() {
        assert_eq!(PERSONA_TTL.as_secs(), 31_536_000);
    }
}
