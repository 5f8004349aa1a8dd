//! Counting telemetry sink.
//!
//! Tracks how often each degradation path was taken so an embedding
//! application can see failures the engine otherwise swallows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Something worth reporting that the engine did not surface to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    EventTracked,
    EventDropped { reason: String },
    LogTruncated { kept: usize },
    ReadFailed { reason: String },
    RuleFailed { rule: &'static str, reason: String },
    InferenceFailed { reason: String },
    PersonaChanged { from: String, to: String },
    PersonaPersistFailed { reason: String },
    SyncSucceeded { count: usize },
    SyncFailed { reason: String },
    PersonaPushed,
    PersonaPushFailed { reason: String },
}

/// Receiver for [`TelemetryEvent`]s.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Thread-safe shared sink.
pub type SharedTelemetry = Arc<dyn TelemetrySink>;

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Counters for each telemetry event kind.
#[derive(Debug)]
pub struct TelemetryLog {
    events_tracked: AtomicU64,
    events_dropped: AtomicU64,
    truncations: AtomicU64,
    read_failures: AtomicU64,
    rule_failures: AtomicU64,
    inference_failures: AtomicU64,
    persona_changes: AtomicU64,
    persona_persist_failures: AtomicU64,
    syncs_succeeded: AtomicU64,
    syncs_failed: AtomicU64,
    events_synced: AtomicU64,
    persona_pushes: AtomicU64,
    persona_push_failures: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self {
            events_tracked: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            truncations: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            rule_failures: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            persona_changes: AtomicU64::new(0),
            persona_persist_failures: AtomicU64::new(0),
            syncs_succeeded: AtomicU64::new(0),
            syncs_failed: AtomicU64::new(0),
            events_synced: AtomicU64::new(0),
            persona_pushes: AtomicU64::new(0),
            persona_push_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a telemetry log that resumes from and saves to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::debug!("Could not load previous telemetry stats: {e}");
        }

        log
    }

    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            events_tracked: self.events_tracked.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            truncations: self.truncations.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            rule_failures: self.rule_failures.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            persona_changes: self.persona_changes.load(Ordering::Relaxed),
            persona_persist_failures: self.persona_persist_failures.load(Ordering::Relaxed),
            syncs_succeeded: self.syncs_succeeded.load(Ordering::Relaxed),
            syncs_failed: self.syncs_failed.load(Ordering::Relaxed),
            events_synced: self.events_synced.load(Ordering::Relaxed),
            persona_pushes: self.persona_pushes.load(Ordering::Relaxed),
            persona_push_failures: self.persona_push_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Telemetry:\n\
             - Events tracked: {}\n\
             - Events dropped: {}\n\
             - Log truncations: {}\n\
             - Read failures: {}\n\
             - Rule failures: {}\n\
             - Inference failures: {}\n\
             - Persona changes: {} ({} not persisted)\n\
             - Syncs: {} ok, {} failed ({} events delivered)\n\
             - Persona pushes: {} ok, {} failed",
            stats.events_tracked,
            stats.events_dropped,
            stats.truncations,
            stats.read_failures,
            stats.rule_failures,
            stats.inference_failures,
            stats.persona_changes,
            stats.persona_persist_failures,
            stats.syncs_succeeded,
            stats.syncs_failed,
            stats.events_synced,
            stats.persona_pushes,
            stats.persona_push_failures,
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                events_tracked: stats.events_tracked,
                events_dropped: stats.events_dropped,
                truncations: stats.truncations,
                read_failures: stats.read_failures,
                rule_failures: stats.rule_failures,
                inference_failures: stats.inference_failures,
                persona_changes: stats.persona_changes,
                persona_persist_failures: stats.persona_persist_failures,
                syncs_succeeded: stats.syncs_succeeded,
                syncs_failed: stats.syncs_failed,
                events_synced: stats.events_synced,
                persona_pushes: stats.persona_pushes,
                persona_push_failures: stats.persona_push_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.events_tracked.store(persisted.events_tracked, Ordering::Relaxed);
                self.events_dropped.store(persisted.events_dropped, Ordering::Relaxed);
                self.truncations.store(persisted.truncations, Ordering::Relaxed);
                self.read_failures.store(persisted.read_failures, Ordering::Relaxed);
                self.rule_failures.store(persisted.rule_failures, Ordering::Relaxed);
                self.inference_failures
                    .store(persisted.inference_failures, Ordering::Relaxed);
                self.persona_changes.store(persisted.persona_changes, Ordering::Relaxed);
                self.persona_persist_failures
                    .store(persisted.persona_persist_failures, Ordering::Relaxed);
                self.syncs_succeeded.store(persisted.syncs_succeeded, Ordering::Relaxed);
                self.syncs_failed.store(persisted.syncs_failed, Ordering::Relaxed);
                self.events_synced.store(persisted.events_synced, Ordering::Relaxed);
                self.persona_pushes.store(persisted.persona_pushes, Ordering::Relaxed);
                self.persona_push_failures
                    .store(persisted.persona_push_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.events_tracked,
            &self.events_dropped,
            &self.truncations,
            &self.read_failures,
            &self.rule_failures,
            &self.inference_failures,
            &self.persona_changes,
            &self.persona_persist_failures,
            &self.syncs_succeeded,
            &self.syncs_failed,
            &self.events_synced,
            &self.persona_pushes,
            &self.persona_push_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for TelemetryLog {
    fn record(&self, event: TelemetryEvent) {
        let counter = match event {
            TelemetryEvent::EventTracked => &self.events_tracked,
            TelemetryEvent::EventDropped { .. } => &self.events_dropped,
            TelemetryEvent::LogTruncated { .. } => &self.truncations,
            TelemetryEvent::ReadFailed { .. } => &self.read_failures,
            TelemetryEvent::RuleFailed { .. } => &self.rule_failures,
            TelemetryEvent::InferenceFailed { .. } => &self.inference_failures,
            TelemetryEvent::PersonaChanged { .. } => &self.persona_changes,
            TelemetryEvent::PersonaPersistFailed { .. } => &self.persona_persist_failures,
            TelemetryEvent::SyncSucceeded { count } => {
                self.events_synced.fetch_add(count as u64, Ordering::Relaxed);
                &self.syncs_succeeded
            }
            TelemetryEvent::SyncFailed { .. } => &self.syncs_failed,
            TelemetryEvent::PersonaPushed => &self.persona_pushes,
            TelemetryEvent::PersonaPushFailed { .. } => &self.persona_push_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of telemetry counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub events_tracked: u64,
    pub events_dropped: u64,
    pub truncations: u64,
    pub read_failures: u64,
    pub rule_failures: u64,
    pub inference_failures: u64,
    pub persona_changes: u64,
    pub persona_persist_failures: u64,
    pub syncs_succeeded: u64,
    pub syncs_failed: u64,
    pub events_synced: u64,
    pub persona_pushes: u64,
    pub persona_push_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    events_tracked: u64,
    events_dropped: u64,
    truncations: u64,
    read_failures: u64,
    rule_failures: u64,
    inference_failures: u64,
    persona_changes: u64,
    #[serde(default)]
    persona_persist_failures: u64,
    syncs_succeeded: u64,
    syncs_failed: u64,
    events_synced: u64,
    persona_pushes: u64,
    persona_push_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Create a new shared telemetry log.
pub fn create_shared_telemetry() -> Arc<TelemetryLog> {
    Arc::new(TelemetryLog::new())
}

/// Create a new shared telemetry log with persistence.
pub fn create_shared_telemetry_with_persistence(path: PathBuf) -> Arc<TelemetryLog> {
    Arc::new(TelemetryLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let log = TelemetryLog::new();

        log.record(TelemetryEvent::EventTracked);
        log.record(TelemetryEvent::EventTracked);
        log.record(TelemetryEvent::EventDropped {
            reason: "quota".to_string(),
        });
        log.record(TelemetryEvent::SyncSucceeded { count: 12 });

        let stats = log.stats();
        assert_eq!(stats.events_tracked, 2);
        assert_eq!(stats.events_dropped, 1);
        assert_eq!(stats.syncs_succeeded, 1);
        assert_eq!(stats.events_synced, 12);
    }

    #[test]
    fn test_persist_and_push_failures_counted_apart() {
        let log = TelemetryLog::new();
        log.record(TelemetryEvent::PersonaPersistFailed {
            reason: "storage unavailable".to_string(),
        });

        let stats = log.stats();
        assert_eq!(stats.persona_persist_failures, 1);
        assert_eq!(stats.persona_push_failures, 0);
        assert!(log.summary().contains("Persona changes: 0 (1 not persisted)"));
        assert!(log.summary().contains("Persona pushes: 0 ok, 0 failed"));
    }

    #[test]
    fn test_reset() {
        let log = TelemetryLog::new();
        log.record(TelemetryEvent::RuleFailed {
            rule: "page_view.long_visit",
            reason: "nan".to_string(),
        });
        log.reset();
        assert_eq!(log.stats().rule_failures, 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let path = std::env::temp_dir()
            .join("persona-engine-telemetry-test")
            .join(format!("{}.json", uuid::Uuid::new_v4()));

        let log = TelemetryLog::with_persistence(path.clone());
        log.record(TelemetryEvent::PersonaPushed);
        log.record(TelemetryEvent::SyncFailed {
            reason: "offline".to_string(),
        });
        log.save().unwrap();

        let reloaded = TelemetryLog::with_persistence(path.clone());
        let stats = reloaded.stats();
        assert_eq!(stats.persona_pushes, 1);
        assert_eq!(stats.syncs_failed, 1);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_summary_format() {
        let summary = TelemetryLog::new().summary();
        assert!(summary.contains("Events tracked"));
        assert!(summary.contains("Syncs"));
    }
}
