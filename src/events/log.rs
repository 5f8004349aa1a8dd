//! Bounded, persisted log of interaction events.
//!
//! The log lives entirely in the backing [`KeyValueStore`]: every operation
//! re-reads the persisted array, so several handles over the same store see
//! the same events. Nothing here returns an error to the caller; storage
//! failures degrade to dropped events or empty reads.

use crate::config::TrackingConfig;
use crate::error::StorageError;
use crate::events::types::{EventData, EventName, TrackingEvent};
use crate::remote::RemoteSink;
use crate::storage::{MemoryStore, SharedStore, EVENTS_KEY, SESSION_KEY};
use crate::telemetry::{NoopTelemetry, SharedTelemetry, TelemetryEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

/// Number of most recent events kept when a write hits the storage quota.
pub const QUOTA_FALLBACK_EVENTS: usize = 50;

/// Page the events are being captured on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    pub referrer: String,
}

/// Aggregate view of the log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: usize,
    pub events_by_type: BTreeMap<EventName, usize>,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
    /// Minutes between the first and last event
    pub session_duration_minutes: f64,
}

/// Result of [`EventLog::sync_with_server`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The endpoint confirmed the batch and it was removed locally.
    Synced { count: usize },
    /// Nothing to send.
    Skipped,
    /// Delivery failed; the log is untouched and the next attempt resends.
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, SyncOutcome::Failed { .. })
    }
}

pub struct EventLog {
    store: SharedStore,
    /// Holds the session id; lives as long as the browsing session
    session_store: SharedStore,
    max_events: usize,
    debug: bool,
    enabled: AtomicBool,
    page: RwLock<PageContext>,
    /// Session id used when the session store cannot be written
    fallback_session: OnceLock<String>,
    telemetry: SharedTelemetry,
}

impl EventLog {
    /// Create a log over `store`. The session id lives in a process-scoped
    /// memory store unless [`with_session_store`](Self::with_session_store) is used.
    pub fn new(store: SharedStore, config: &TrackingConfig) -> Self {
        Self {
            store,
            session_store: Arc::new(MemoryStore::new()),
            max_events: config.max_events,
            debug: config.debug,
            enabled: AtomicBool::new(config.enabled),
            page: RwLock::new(PageContext::default()),
            fallback_session: OnceLock::new(),
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_session_store(mut self, session_store: SharedStore) -> Self {
        self.session_store = session_store;
        self
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Set the url and referrer stamped on subsequently captured events.
    pub fn set_page_context(&self, url: impl Into<String>, referrer: impl Into<String>) {
        let mut page = self.page.write().unwrap_or_else(|p| p.into_inner());
        *page = PageContext {
            url: url.into(),
            referrer: referrer.into(),
        };
    }

    pub fn page_context(&self) -> PageContext {
        self.page.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Capture an event now.
    pub fn track(&self, data: EventData) {
        self.track_at(data, Utc::now());
    }

    /// Capture an event with an explicit timestamp.
    pub fn track_at(&self, data: EventData, timestamp: DateTime<Utc>) {
        if !self.is_enabled() {
            return;
        }

        let name = data.name();
        let page = self.page_context();
        let event = TrackingEvent {
            timestamp,
            data,
            url: page.url,
            referrer: page.referrer,
            session_id: self.session_id(),
        };

        match self.append(event) {
            Ok(()) => {
                if self.debug {
                    tracing::info!(event = %name, "Tracked event");
                } else {
                    tracing::debug!(event = %name, "Tracked event");
                }
                self.telemetry.record(TelemetryEvent::EventTracked);
            }
            Err(e) => {
                tracing::warn!(event = %name, "Dropping event: {e}");
                self.telemetry.record(TelemetryEvent::EventDropped {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn append(&self, event: TrackingEvent) -> Result<(), StorageError> {
        let mut events = self.try_events().unwrap_or_else(|e| {
            tracing::warn!("Discarding unreadable event log: {e}");
            self.telemetry.record(TelemetryEvent::ReadFailed {
                reason: e.to_string(),
            });
            Vec::new()
        });

        events.push(event);
        if events.len() > self.max_events {
            let excess = events.len() - self.max_events;
            events.drain(..excess);
        }

        match self.write(&events) {
            Err(e) if e.is_quota() => {
                let excess = events.len().saturating_sub(QUOTA_FALLBACK_EVENTS);
                events.drain(..excess);
                tracing::warn!(
                    kept = events.len(),
                    "Storage quota exceeded, truncating event log and retrying"
                );
                self.telemetry.record(TelemetryEvent::LogTruncated { kept: events.len() });
                self.write(&events)
            }
            other => other,
        }
    }

    fn write(&self, events: &[TrackingEvent]) -> Result<(), StorageError> {
        let json = serde_json::to_string(events)?;
        self.store.set(EVENTS_KEY, &json, None)
    }

    /// Read the persisted log, surfacing storage and decoding failures.
    pub fn try_events(&self) -> Result<Vec<TrackingEvent>, StorageError> {
        match self.store.get(EVENTS_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// All events in insertion order. Empty if the log cannot be read.
    pub fn events(&self) -> Vec<TrackingEvent> {
        self.try_events().unwrap_or_else(|e| {
            tracing::warn!("Failed to read event log: {e}");
            self.telemetry.record(TelemetryEvent::ReadFailed {
                reason: e.to_string(),
            });
            Vec::new()
        })
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn events_by_type(&self, name: EventName) -> Vec<TrackingEvent> {
        self.events().into_iter().filter(|e| e.name() == name).collect()
    }

    /// Events with `start <= timestamp <= end`.
    pub fn events_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<TrackingEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect()
    }

    /// Events captured within the last `minutes` minutes.
    ///
    /// A window reaching past the earliest representable time returns
    /// every event.
    pub fn recent_events(&self, minutes: i64) -> Vec<TrackingEvent> {
        let cutoff = Duration::try_minutes(minutes.max(0))
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let events = self.events();
        match cutoff {
            Some(cutoff) => events.into_iter().filter(|e| e.timestamp >= cutoff).collect(),
            None => events,
        }
    }

    /// Wipe the persisted log.
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(EVENTS_KEY) {
            tracing::warn!("Failed to clear event log: {e}");
        }
    }

    pub fn stats(&self) -> EventStats {
        let events = self.events();
        if events.is_empty() {
            return EventStats::default();
        }

        let mut events_by_type = BTreeMap::new();
        for event in &events {
            *events_by_type.entry(event.name()).or_insert(0) += 1;
        }

        let first_event = events.iter().map(|e| e.timestamp).min();
        let last_event = events.iter().map(|e| e.timestamp).max();
        let session_duration_minutes = match (first_event, last_event) {
            (Some(first), Some(last)) => (last - first).num_milliseconds() as f64 / 60_000.0,
            _ => 0.0,
        };

        EventStats {
            total_events: events.len(),
            events_by_type,
            first_event,
            last_event,
            session_duration_minutes,
        }
    }

    /// Send the whole log to `remote`, removing the sent events on success.
    ///
    /// Events captured while the request is in flight are kept. On failure
    /// nothing changes, so the same events go out with the next attempt.
    pub async fn sync_with_server<R: RemoteSink>(&self, remote: &R) -> SyncOutcome {
        let events = match self.try_events() {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Sync skipped, event log unreadable: {e}");
                self.telemetry.record(TelemetryEvent::SyncFailed {
                    reason: e.to_string(),
                });
                return SyncOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if events.is_empty() {
            return SyncOutcome::Skipped;
        }

        match remote.send_events(&events).await {
            Ok(receipt) => {
                tracing::info!(count = events.len(), status = receipt.status, "Synced events");
                self.remove_synced(&events);
                self.telemetry.record(TelemetryEvent::SyncSucceeded {
                    count: events.len(),
                });
                SyncOutcome::Synced {
                    count: events.len(),
                }
            }
            Err(e) => {
                tracing::warn!(count = events.len(), "Event sync failed: {e}");
                self.telemetry.record(TelemetryEvent::SyncFailed {
                    reason: e.to_string(),
                });
                SyncOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn remove_synced(&self, sent: &[TrackingEvent]) {
        let mut current = self.events();
        let delivered = delivered_prefix(&current, sent);
        current.drain(..delivered);

        let result = if current.is_empty() {
            self.store.remove(EVENTS_KEY)
        } else {
            self.write(&current)
        };
        if let Err(e) = result {
            // The batch will be delivered again on the next sync
            tracing::warn!("Failed to prune synced events: {e}");
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Stop capturing. Stored events are kept.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// The current session id, created on first use.
    pub fn session_id(&self) -> String {
        match self.session_store.get(SESSION_KEY) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => tracing::debug!("Session store unreadable: {e}"),
        }

        let id = new_session_id();
        match self.session_store.set(SESSION_KEY, &id, None) {
            Ok(()) => id,
            Err(e) => {
                tracing::debug!("Session store unwritable: {e}");
                self.fallback_session.get_or_init(|| id).clone()
            }
        }
    }
}

/// Number of leading events in `current` that were part of `sent`.
///
/// New events are only ever appended, so what is left of the sent batch is
/// a run at the front of the log. FIFO eviction during the request may have
/// removed its head, so the longest surviving tail of `sent` wins.
fn delivered_prefix(current: &[TrackingEvent], sent: &[TrackingEvent]) -> usize {
    (0..sent.len())
        .map(|start| &sent[start..])
        .find(|tail| current.starts_with(tail))
        .map_or(0, |tail| tail.len())
}

fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::events::types::{PageView, ScrollDepth, SearchQuery};
    use crate::remote::SyncReceipt;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::telemetry::TelemetryLog;
    use std::sync::Mutex;

    fn config(max_events: usize) -> TrackingConfig {
        TrackingConfig {
            max_events,
            ..TrackingConfig::default()
        }
    }

    fn scroll(depth: u8) -> EventData {
        EventData::ScrollDepth(ScrollDepth { depth, page: None })
    }

    fn page(path: &str) -> EventData {
        EventData::PageView(PageView {
            path: path.to_string(),
            duration: None,
            title: None,
        })
    }

    fn captured(data: EventData, timestamp: DateTime<Utc>) -> TrackingEvent {
        TrackingEvent {
            timestamp,
            data,
            url: String::new(),
            referrer: String::new(),
            session_id: "session_test".to_string(),
        }
    }

    /// Remote that records batches and answers with a fixed result.
    struct RecordingRemote {
        fail: bool,
        batches: Mutex<Vec<usize>>,
    }

    impl RecordingRemote {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    impl RemoteSink for RecordingRemote {
        async fn send_events(&self, events: &[TrackingEvent]) -> Result<SyncReceipt, RemoteError> {
            self.batches.lock().unwrap().push(events.len());
            if self.fail {
                Err(RemoteError::Server {
                    status: 503,
                    message: "down".to_string(),
                })
            } else {
                Ok(SyncReceipt {
                    status: 200,
                    body: None,
                })
            }
        }

        async fn push_persona(&self, _persona: crate::scoring::Persona) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    #[test]
    fn test_track_appends_with_context() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        log.set_page_context("https://shop.example/pricing", "https://search.example");
        log.track(page("/pricing"));

        let events = log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), EventName::PageView);
        assert_eq!(events[0].url, "https://shop.example/pricing");
        assert_eq!(events[0].referrer, "https://search.example");
        assert!(events[0].session_id.starts_with("session_"));
    }

    #[test]
    fn test_log_never_exceeds_max_events() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(10));
        for depth in 0..25u8 {
            log.track(scroll(depth));
            assert!(log.len() <= 10);
        }

        // Oldest evicted first
        let events = log.events();
        assert_eq!(events.len(), 10);
        match &events[0].data {
            EventData::ScrollDepth(s) => assert_eq!(s.depth, 15),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_disable_stops_capture_but_keeps_events() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        log.track(scroll(10));
        log.disable();
        assert!(!log.is_enabled());
        log.track(scroll(20));
        assert_eq!(log.len(), 1);

        log.enable();
        log.track(scroll(30));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_quota_failure_truncates_and_retries() {
        // Measure the size of 50 events, then allow a bit more than that
        let probe = Arc::new(MemoryStore::new());
        let sizing = EventLog::new(probe.clone(), &config(100));
        for _ in 0..QUOTA_FALLBACK_EVENTS {
            sizing.track(scroll(50));
        }
        let quota = probe.used_bytes() + 200;

        let telemetry = Arc::new(TelemetryLog::new());
        let log = EventLog::new(Arc::new(MemoryStore::with_quota(quota)), &config(100))
            .with_telemetry(telemetry.clone());
        for _ in 0..80 {
            log.track(scroll(50));
        }

        let events = log.events();
        assert!(!events.is_empty());
        assert!(events.len() <= 51);
        assert!(telemetry.stats().truncations >= 1);
        assert_eq!(telemetry.stats().events_dropped, 0);
    }

    #[test]
    fn test_unavailable_store_drops_silently() {
        let store = Arc::new(MemoryStore::new());
        let telemetry = Arc::new(TelemetryLog::new());
        let log = EventLog::new(store.clone(), &config(100)).with_telemetry(telemetry.clone());

        store.set_unavailable(true);
        log.track(scroll(10));
        assert!(log.events().is_empty());
        assert_eq!(telemetry.stats().events_dropped, 1);

        store.set_unavailable(false);
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_corrupt_log_reads_as_empty() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw(EVENTS_KEY, "[{\"timestamp\": oops");
        let log = EventLog::new(store.clone(), &config(100));

        assert!(log.events().is_empty());
        assert!(log.try_events().is_err());
        assert_eq!(log.stats(), EventStats::default());

        // Next track replaces the corrupt payload
        log.track(scroll(10));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_queries() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        let now = Utc::now();
        log.track_at(page("/"), now - Duration::minutes(40));
        log.track_at(scroll(80), now - Duration::minutes(20));
        log.track_at(
            EventData::SearchQuery(SearchQuery {
                query: "vitamin d".to_string(),
                results_count: Some(4),
            }),
            now - Duration::minutes(2),
        );

        assert_eq!(log.events_by_type(EventName::ScrollDepth).len(), 1);
        assert_eq!(log.events_by_type(EventName::ChatOpen).len(), 0);
        assert_eq!(
            log.events_in_range(now - Duration::minutes(30), now).len(),
            2
        );
        assert_eq!(log.recent_events(5).len(), 1);
    }

    #[test]
    fn test_recent_events_with_huge_window_returns_everything() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        log.track_at(page("/"), Utc::now() - Duration::days(400));
        log.track(scroll(10));

        assert_eq!(log.recent_events(1_000_000_000_000).len(), 2);
        assert_eq!(log.recent_events(i64::MAX).len(), 2);
        assert_eq!(log.recent_events(60).len(), 1);
    }

    #[test]
    fn test_stats() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        assert_eq!(log.stats().total_events, 0);
        assert_eq!(log.stats().session_duration_minutes, 0.0);

        // Persisted timestamps have millisecond precision
        let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        log.track_at(page("/"), now - Duration::minutes(12));
        log.track_at(page("/about"), now - Duration::minutes(6));
        log.track_at(scroll(90), now);

        let stats = log.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.events_by_type[&EventName::PageView], 2);
        assert_eq!(stats.events_by_type[&EventName::ScrollDepth], 1);
        assert_eq!(stats.first_event, Some(now - Duration::minutes(12)));
        assert!((stats.session_duration_minutes - 12.0).abs() < 1e-6);
    }

    #[test]
    fn test_session_id_is_stable() {
        let session_store = Arc::new(MemoryStore::new());
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100))
            .with_session_store(session_store.clone());

        let first = log.session_id();
        assert_eq!(log.session_id(), first);
        assert_eq!(session_store.get(SESSION_KEY).unwrap(), Some(first));
    }

    #[test]
    fn test_session_id_survives_unwritable_store() {
        let session_store = Arc::new(MemoryStore::new());
        session_store.set_unavailable(true);
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100))
            .with_session_store(session_store);
        assert_eq!(log.session_id(), log.session_id());
    }

    #[test]
    fn test_clear() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        log.track(scroll(10));
        log.clear();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_sync_success_clears_sent_events() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        for depth in 0..4u8 {
            log.track(scroll(depth));
        }

        let remote = RecordingRemote::new(false);
        let outcome = log.sync_with_server(&remote).await;
        assert_eq!(outcome, SyncOutcome::Synced { count: 4 });
        assert!(log.is_empty());
        assert_eq!(*remote.batches.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_log_for_retry() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        log.track(scroll(10));
        log.track(scroll(20));

        let remote = RecordingRemote::new(true);
        let outcome = log.sync_with_server(&remote).await;
        assert!(!outcome.is_success());
        assert_eq!(log.len(), 2);

        // Retry sends the same batch
        let _ = log.sync_with_server(&remote).await;
        assert_eq!(*remote.batches.lock().unwrap(), vec![2, 2]);
    }

    #[test]
    fn test_delivered_prefix_counts_by_position() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        let at = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        for _ in 0..3 {
            log.track_at(scroll(40), at);
        }
        let sent = log.events();

        // An identical event captured while the batch was in flight
        log.track_at(scroll(40), at);
        let current = log.events();
        assert_eq!(current[3], sent[0]);
        assert_eq!(delivered_prefix(&current, &sent), 3);

        assert_eq!(delivered_prefix(&[], &sent), 0);

        // Eviction removed the head of the sent batch
        let batch = [
            captured(scroll(10), at),
            captured(scroll(20), at),
            captured(scroll(30), at),
        ];
        let after = [batch[1].clone(), batch[2].clone(), captured(scroll(10), at)];
        assert_eq!(delivered_prefix(&after, &batch), 2);
    }

    #[test]
    fn test_sync_keeps_identical_event_tracked_in_flight() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        let at = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        log.track_at(scroll(40), at);
        log.track_at(scroll(40), at);
        let sent = log.events();

        log.track_at(scroll(40), at);
        log.remove_synced(&sent);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_empty_log_is_skipped() {
        let log = EventLog::new(Arc::new(MemoryStore::new()), &config(100));
        let remote = RecordingRemote::new(false);
        assert_eq!(log.sync_with_server(&remote).await, SyncOutcome::Skipped);
        assert!(remote.batches.lock().unwrap().is_empty());
    }
}
