//! Reactive persona consumer.
//!
//! Owns the last adopted [`PersonaInference`], restores a persisted persona on
//! activation and re-runs the engine on a timer. A recomputed result is only
//! adopted when the log grew enough to matter. Persona changes are persisted
//! and pushed to the remote without waiting for the outcome.

use crate::config::{InferenceConfigUpdate, TrackingConfig};
use crate::events::EventLog;
use crate::inference::{InferenceEngine, PersonaInference};
use crate::remote::RemoteSink;
use crate::scoring::{Persona, PersonaScores};
use crate::storage::{SharedStore, PERSONA_KEY, PERSONA_TTL};
use crate::telemetry::{NoopTelemetry, SharedTelemetry, TelemetryEvent};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Confidence assumed for a persona restored from storage.
pub const RESTORED_CONFIDENCE: f64 = 0.8;

/// Growth in event count that makes a recomputed result worth adopting.
pub const RECOMPUTE_EVENT_DELTA: usize = 5;

pub struct PersonaConsumer<R> {
    engine: InferenceEngine,
    store: SharedStore,
    remote: Arc<R>,
    telemetry: SharedTelemetry,
    send_to_analytics: bool,
    sync_interval: Duration,
    current: PersonaInference,
    /// Event count when a result was last adopted
    last_count: usize,
    /// Whether an adopted result has already seen `min_events` events
    crossed_min: bool,
    force: bool,
    /// Cleared on teardown so late network results are ignored
    alive: Arc<AtomicBool>,
    sync_in_flight: Arc<AtomicBool>,
}

impl<R: RemoteSink + 'static> PersonaConsumer<R> {
    /// `store` holds the persisted persona; it may differ from the log's store.
    pub fn new(
        engine: InferenceEngine,
        store: SharedStore,
        remote: Arc<R>,
        tracking: &TrackingConfig,
    ) -> Self {
        Self {
            engine,
            store,
            remote,
            telemetry: Arc::new(NoopTelemetry),
            send_to_analytics: tracking.send_to_analytics,
            sync_interval: tracking.sync_interval,
            current: PersonaInference::new_visitor(0, Utc::now()),
            last_count: 0,
            crossed_min: false,
            force: false,
            alive: Arc::new(AtomicBool::new(true)),
            sync_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn current(&self) -> &PersonaInference {
        &self.current
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    pub fn log(&self) -> &Arc<EventLog> {
        self.engine.log()
    }

    /// Restore the persisted persona, or compute one if none is stored.
    pub fn activate(&mut self) -> &PersonaInference {
        match self.load_persisted() {
            Some(persona) => {
                tracing::info!(%persona, "Restored persisted persona");
                self.current = PersonaInference {
                    primary: persona,
                    confidence: RESTORED_CONFIDENCE,
                    scores: PersonaScores::new(),
                    events_analyzed: 0,
                    timestamp: Utc::now(),
                };
            }
            None => {
                let count = self.log().len();
                let inference = self.engine.calculate_persona();
                self.adopt(inference, count);
            }
        }
        &self.current
    }

    fn load_persisted(&self) -> Option<Persona> {
        let value = match self.store.get(PERSONA_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Persisted persona unreadable: {e}");
                return None;
            }
        };

        match value.parse::<Persona>() {
            Ok(Persona::NewVisitor) => None,
            Ok(persona) => Some(persona),
            Err(e) => {
                tracing::warn!("Ignoring persisted persona: {e}");
                None
            }
        }
    }

    /// One timer tick. Returns whether a recomputed result was adopted.
    pub fn tick(&mut self) -> bool {
        let count = self.log().len();
        // The log shrank through a sync or clear; measure growth from here
        if count < self.last_count {
            self.last_count = count;
        }

        let first_crossing = !self.crossed_min && count >= self.engine.config().min_events;
        let grown = count >= self.last_count + RECOMPUTE_EVENT_DELTA;
        if !(self.force || first_crossing || grown) {
            return false;
        }

        self.force = false;
        let inference = self.engine.calculate_persona();
        self.adopt(inference, count);
        true
    }

    /// Force the next tick to recompute.
    pub fn recalculate(&mut self) {
        self.force = true;
    }

    /// Forget the persona and wipe the event log.
    pub fn reset(&mut self) {
        if let Err(e) = self.store.remove(PERSONA_KEY) {
            tracing::warn!("Failed to remove persisted persona: {e}");
        }
        self.log().clear();

        self.current = PersonaInference::new_visitor(0, Utc::now());
        self.last_count = 0;
        self.crossed_min = false;
        self.force = false;
        tracing::info!("Persona reset");
    }

    pub fn configure(&mut self, update: &InferenceConfigUpdate) {
        self.engine.configure(update);
    }

    fn adopt(&mut self, inference: PersonaInference, count: usize) {
        self.last_count = count;
        if count >= self.engine.config().min_events {
            self.crossed_min = true;
        }

        let previous = self.current.primary;
        self.current = inference;
        if self.current.primary != previous {
            self.on_persona_change(previous);
        }
    }

    fn on_persona_change(&self, previous: Persona) {
        let persona = self.current.primary;
        tracing::info!(
            from = %previous,
            to = %persona,
            confidence = self.current.confidence,
            "Persona changed"
        );
        self.telemetry.record(TelemetryEvent::PersonaChanged {
            from: previous.to_string(),
            to: persona.to_string(),
        });

        if persona == Persona::NewVisitor {
            return;
        }

        if let Err(e) = self.store.set(PERSONA_KEY, persona.as_str(), Some(PERSONA_TTL)) {
            tracing::warn!("Failed to persist persona: {e}");
            self.telemetry.record(TelemetryEvent::PersonaPersistFailed {
                reason: e.to_string(),
            });
        }

        self.push(persona);
    }

    fn push(&self, persona: Persona) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(%persona, "No async runtime, skipping persona push");
            return;
        };

        let remote = self.remote.clone();
        let telemetry = self.telemetry.clone();
        let alive = self.alive.clone();
        runtime.spawn(async move {
            let result = remote.push_persona(persona).await;
            if !alive.load(Ordering::SeqCst) {
                return;
            }
            match result {
                Ok(()) => {
                    tracing::debug!(%persona, "Persona pushed");
                    telemetry.record(TelemetryEvent::PersonaPushed);
                }
                Err(e) => {
                    tracing::warn!(%persona, "Persona push failed: {e}");
                    telemetry.record(TelemetryEvent::PersonaPushFailed {
                        reason: e.to_string(),
                    });
                }
            }
        });
    }

    /// Start a background sync unless one is already running.
    fn spawn_sync(&self) {
        if self.sync_in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!("Sync already in flight");
            return;
        }

        let log = self.log().clone();
        let remote = self.remote.clone();
        let in_flight = self.sync_in_flight.clone();
        tokio::spawn(async move {
            let outcome = log.sync_with_server(&*remote).await;
            tracing::debug!(?outcome, "Periodic sync finished");
            in_flight.store(false, Ordering::SeqCst);
        });
    }

    /// Activate and run the timers on the current tokio runtime.
    ///
    /// Dropping the returned handle stops the loop as well.
    pub fn spawn(mut self) -> ConsumerHandle {
        self.activate();

        let (persona_tx, persona_rx) = watch::channel(self.current.clone());
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut recalc = periodic(self.engine.config().recalculation_interval);
            let mut sync = periodic(self.sync_interval);
            let sync_enabled = self.send_to_analytics;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = recalc.tick() => {
                        self.tick();
                    }
                    _ = sync.tick(), if sync_enabled => {
                        self.spawn_sync();
                    }
                    Some(command) = command_rx.recv() => match command {
                        Command::Recalculate => self.recalculate(),
                        Command::Reset => self.reset(),
                        Command::Configure(update) => {
                            self.configure(&update);
                            recalc = periodic(self.engine.config().recalculation_interval);
                        }
                    },
                }

                persona_tx.send_if_modified(|published| {
                    if *published == self.current {
                        return false;
                    }
                    *published = self.current.clone();
                    true
                });
            }

            tracing::debug!("Persona consumer stopped");
        });

        ConsumerHandle {
            persona: persona_rx,
            commands: command_tx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

impl<R> Drop for PersonaConsumer<R> {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

fn periodic(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

#[derive(Debug)]
enum Command {
    Recalculate,
    Reset,
    Configure(InferenceConfigUpdate),
}

/// Handle to a consumer running on tokio.
pub struct ConsumerHandle {
    persona: watch::Receiver<PersonaInference>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// The most recently adopted inference.
    pub fn current(&self) -> PersonaInference {
        self.persona.borrow().clone()
    }

    /// A receiver notified on every adopted result.
    pub fn subscribe(&self) -> watch::Receiver<PersonaInference> {
        self.persona.clone()
    }

    pub fn recalculate(&self) {
        self.send(Command::Recalculate);
    }

    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    pub fn configure(&self, update: InferenceConfigUpdate) {
        self.send(Command::Configure(update));
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Persona consumer already stopped");
        }
    }

    /// Stop the timers and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            tracing::warn!("Persona consumer task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferenceConfig;
    use crate::error::RemoteError;
    use crate::events::types::{EventData, PageView};
    use crate::events::TrackingEvent;
    use crate::remote::SyncReceipt;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::telemetry::create_shared_telemetry;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRemote {
        pushed: Mutex<Vec<Persona>>,
        synced: Mutex<usize>,
    }

    impl RemoteSink for RecordingRemote {
        async fn send_events(&self, events: &[TrackingEvent]) -> Result<SyncReceipt, RemoteError> {
            *self.synced.lock().unwrap() += events.len();
            Ok(SyncReceipt {
                status: 200,
                body: None,
            })
        }

        async fn push_persona(&self, persona: Persona) -> Result<(), RemoteError> {
            self.pushed.lock().unwrap().push(persona);
            Ok(())
        }
    }

    struct Fixture {
        log: Arc<EventLog>,
        persona_store: Arc<MemoryStore>,
        remote: Arc<RecordingRemote>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                log: Arc::new(EventLog::new(
                    Arc::new(MemoryStore::new()),
                    &TrackingConfig::default(),
                )),
                persona_store: Arc::new(MemoryStore::new()),
                remote: Arc::new(RecordingRemote::default()),
            }
        }

        fn consumer(&self, tracking: &TrackingConfig) -> PersonaConsumer<RecordingRemote> {
            let engine = InferenceEngine::new(self.log.clone(), InferenceConfig::default());
            PersonaConsumer::new(
                engine,
                self.persona_store.clone(),
                self.remote.clone(),
                tracking,
            )
        }

        fn track_pricing(&self, n: usize) {
            for _ in 0..n {
                self.log.track(EventData::PageView(PageView {
                    path: "/pricing".to_string(),
                    duration: Some(150.0),
                    title: None,
                }));
            }
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_activate_restores_persisted_persona() {
        let fixture = Fixture::new();
        fixture
            .persona_store
            .set(PERSONA_KEY, "price_sensitive", Some(PERSONA_TTL))
            .unwrap();

        let mut consumer = fixture.consumer(&TrackingConfig::default());
        let current = consumer.activate();

        assert_eq!(current.primary, Persona::PriceSensitive);
        assert_eq!(current.confidence, RESTORED_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_activate_recomputes_without_valid_entry() {
        let fixture = Fixture::new();
        fixture.persona_store.insert_raw(PERSONA_KEY, "space_cowboy");
        fixture.track_pricing(6);

        let mut consumer = fixture.consumer(&TrackingConfig::default());
        consumer.activate();
        settle().await;

        assert_eq!(consumer.current().primary, Persona::Researcher);
        assert_eq!(
            fixture.persona_store.get(PERSONA_KEY).unwrap().as_deref(),
            Some("researcher")
        );
        assert_eq!(*fixture.remote.pushed.lock().unwrap(), vec![Persona::Researcher]);
    }

    #[tokio::test]
    async fn test_gate_waits_for_growth() {
        let fixture = Fixture::new();
        let mut consumer = fixture.consumer(&TrackingConfig::default());
        consumer.activate();
        assert!(consumer.current().is_new_visitor());

        fixture.track_pricing(4);
        assert!(!consumer.tick());

        // First time the minimum is reached
        fixture.track_pricing(1);
        assert!(consumer.tick());
        assert_eq!(consumer.current().primary, Persona::Researcher);

        fixture.track_pricing(4);
        assert!(!consumer.tick());

        fixture.track_pricing(1);
        assert!(consumer.tick());
        assert_eq!(consumer.current().events_analyzed, 10);
    }

    #[tokio::test]
    async fn test_recalculate_forces_next_tick() {
        let fixture = Fixture::new();
        fixture.track_pricing(6);
        let mut consumer = fixture.consumer(&TrackingConfig::default());
        consumer.activate();

        assert!(!consumer.tick());
        consumer.recalculate();
        assert!(consumer.tick());
        assert!(!consumer.tick());
    }

    #[tokio::test]
    async fn test_gate_rebases_after_log_shrinks() {
        let fixture = Fixture::new();
        fixture.track_pricing(10);
        let mut consumer = fixture.consumer(&TrackingConfig::default());
        consumer.activate();

        fixture.log.clear();
        assert!(!consumer.tick());
        fixture.track_pricing(4);
        assert!(!consumer.tick());
        fixture.track_pricing(1);
        assert!(consumer.tick());
    }

    #[tokio::test]
    async fn test_reset() {
        let fixture = Fixture::new();
        fixture.track_pricing(6);
        let mut consumer = fixture.consumer(&TrackingConfig::default());
        consumer.activate();
        assert_eq!(consumer.current().primary, Persona::Researcher);

        consumer.reset();

        assert!(consumer.current().is_new_visitor());
        assert_eq!(consumer.current().confidence, 0.0);
        assert!(fixture.log.is_empty());
        assert_eq!(fixture.persona_store.get(PERSONA_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_persist_failure_still_adopts() {
        let fixture = Fixture::new();
        fixture.persona_store.set_unavailable(true);
        fixture.track_pricing(6);
        let telemetry = create_shared_telemetry();

        let mut consumer = fixture
            .consumer(&TrackingConfig::default())
            .with_telemetry(telemetry.clone());
        consumer.activate();
        settle().await;

        assert_eq!(consumer.current().primary, Persona::Researcher);
        let stats = telemetry.stats();
        assert_eq!(stats.persona_changes, 1);
        assert_eq!(stats.persona_pushes, 1);
        assert_eq!(stats.persona_persist_failures, 1);
        assert_eq!(stats.persona_push_failures, 0);
    }

    #[test]
    fn test_no_runtime_skips_push() {
        let fixture = Fixture::new();
        fixture.track_pricing(6);
        let mut consumer = fixture.consumer(&TrackingConfig::default());
        consumer.activate();

        assert_eq!(consumer.current().primary, Persona::Researcher);
        assert!(fixture.remote.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_consumer_publishes_changes() {
        let fixture = Fixture::new();
        let mut consumer = fixture.consumer(&TrackingConfig {
            send_to_analytics: false,
            ..TrackingConfig::default()
        });
        consumer.configure(&InferenceConfigUpdate {
            recalculation_interval_ms: Some(10),
            ..Default::default()
        });

        let handle = consumer.spawn();
        let mut updates = handle.subscribe();
        assert!(handle.current().is_new_visitor());

        fixture.track_pricing(6);
        tokio::time::timeout(Duration::from_secs(5), async {
            while updates.borrow_and_update().primary != Persona::Researcher {
                updates.changed().await.unwrap();
            }
        })
        .await
        .expect("persona was not published");

        handle.reset();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !updates.borrow_and_update().is_new_visitor() {
                updates.changed().await.unwrap();
            }
        })
        .await
        .expect("reset was not published");
        assert!(fixture.log.is_empty());

        handle.shutdown().await;
        assert_eq!(*fixture.remote.synced.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spawned_consumer_syncs_periodically() {
        let fixture = Fixture::new();
        let consumer = fixture.consumer(&TrackingConfig {
            send_to_analytics: true,
            sync_interval: Duration::from_millis(10),
            ..TrackingConfig::default()
        });
        fixture.track_pricing(3);

        let handle = consumer.spawn();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !fixture.log.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("log was not synced");
        handle.shutdown().await;

        assert_eq!(*fixture.remote.synced.lock().unwrap(), 3);
    }
}
