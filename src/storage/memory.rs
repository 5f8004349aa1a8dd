//! In-memory store.
//!
//! Backs the session-scoped entries by default (lifetime = the process) and
//! doubles as the test fake: it can simulate a byte quota and an unavailable
//! backend.

use super::{KeyValueStore, StoredEntry};
use crate::error::StorageError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    /// Maximum total bytes (keys + values); `None` means unbounded
    quota: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes pushing its footprint past `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Self::default()
        }
    }

    /// Make every operation fail with [`StorageError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Write a raw value, bypassing quota checks. Used to plant corrupt data.
    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), StoredEntry::new(value, None, Utc::now()));
        }
    }

    /// Current footprint in bytes.
    pub fn used_bytes(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, e)| StoredEntry::footprint(k, &e.value))
                    .sum()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StoredEntry>>, StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store disabled".to_string()));
        }
        self.entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut entries = self.lock()?;
        let now = Utc::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        let mut entries = self.lock()?;

        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, e)| StoredEntry::footprint(k, &e.value))
                .sum();
            let needed = others + StoredEntry::footprint(key, value);
            if needed > quota {
                return Err(StorageError::QuotaExceeded {
                    needed,
                    available: quota,
                });
            }
        }

        entries.insert(key.to_string(), StoredEntry::new(value, ttl, Utc::now()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", "1", None).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);

        // Removing twice is fine
        store.remove("a").unwrap();
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let store = MemoryStore::with_quota(10);
        store.set("k", "12345", None).unwrap();

        let err = store.set("k2", "1234567890", None).unwrap_err();
        assert!(err.is_quota());

        // Overwriting the same key only counts the new value
        store.set("k", "123456789", None).unwrap();
        assert_eq!(store.used_bytes(), 10);
    }

    #[test]
    fn test_unavailable_store() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get("a"),
            Err(StorageError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn test_expired_entry_reads_as_missing() {
        let store = MemoryStore::new();
        store.set("a", "1", Some(Duration::ZERO)).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }
}
