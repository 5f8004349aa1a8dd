//! JSON file-backed store.
//!
//! The whole map is re-read on every operation, so several processes can
//! share one file. Concurrent writers are not coordinated: the last write
//! wins.

use super::{KeyValueStore, StoredEntry};
use crate::error::StorageError;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

type EntryMap = HashMap<String, StoredEntry>;

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    quota: Option<usize>,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Limit the total bytes of keys and values held in the file.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<EntryMap, StorageError> {
        if !self.path.exists() {
            return Ok(EntryMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(EntryMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Write through a sibling temp file so a crash never leaves a partial map.
    fn write_map(&self, map: &EntryMap) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(map)?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Run `f` over the live entries. Reads report an undecodable file;
    /// writes (`recover`) start over from an empty map and replace it.
    fn with_map<T>(
        &self,
        recover: bool,
        f: impl FnOnce(&mut EntryMap) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Unavailable("file store lock poisoned".to_string()))?;

        let (mut map, mut dirty) = match self.read_map() {
            Ok(map) => (map, false),
            Err(StorageError::Serialization(e)) if recover => {
                tracing::warn!(path = %self.path.display(), "Replacing corrupt store file: {e}");
                (EntryMap::new(), true)
            }
            Err(e) => return Err(e),
        };
        let now = Utc::now();
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now));
        dirty |= map.len() != before;

        let out = f(&mut map)?;
        // Writes inside `f` persist on their own; only flush purges here.
        if dirty {
            self.write_map(&map)?;
        }
        Ok(out)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_map(false, |map| Ok(map.get(key).map(|e| e.value.clone())))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        self.with_map(true, |map| {
            if let Some(quota) = self.quota {
                let others: usize = map
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
            map.insert(key.to_string(), StoredEntry::new(value, ttl, Utc::now()));
            self.write_map(map)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_map(true, |map| {
            if map.remove(key).is_some() {
                self.write_map(map)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> FileStore {
        let path = std::env::temp_dir()
            .join("persona-engine-file-store-test")
            .join(format!("{name}-{}.json", uuid::Uuid::new_v4()));
        FileStore::new(path)
    }

    #[test]
    fn test_roundtrip_across_instances() {
        let store = temp_store("roundtrip");
        store.set("a", "hello", None).unwrap();

        let reopened = FileStore::new(store.path().to_path_buf());
        assert_eq!(reopened.get("a").unwrap().as_deref(), Some("hello"));

        reopened.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let store = temp_store("missing");
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_serialization_error() {
        let store = temp_store("corrupt");
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(
            store.get("a"),
            Err(StorageError::Serialization(_))
        ));
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn test_write_replaces_corrupt_file() {
        let store = temp_store("recover");
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), r#"{"persona_tracking_events": {"value": "["#).unwrap();

        store.set("a", "fresh", None).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("fresh"));
        assert!(!store.path().with_extension("json.tmp").exists());
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn test_event_log_recovers_from_corrupt_file() {
        use crate::config::TrackingConfig;
        use crate::events::types::ScrollDepth;
        use crate::events::{EventData, EventLog};
        use std::sync::Arc;

        let store = temp_store("recover-log");
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), r#"{"persona_tracking_events": {"value": "["#).unwrap();
        let path = store.path().to_path_buf();

        let log = EventLog::new(Arc::new(store), &TrackingConfig::default());
        for depth in 0..10u8 {
            log.track(EventData::ScrollDepth(ScrollDepth { depth, page: None }));
        }
        assert_eq!(log.len(), 10);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_quota() {
        let store = temp_store("quota").with_quota(8);
        store.set("k", "1234", None).unwrap();
        assert!(store.set("k2", "123456", None).unwrap_err().is_quota());
        let _ = std::fs::remove_file(store.path());
    }
}
