//! Persona Engine - behavioral persona inference from interaction events.
//!
//! This library captures discrete user-interaction events into a bounded,
//! persisted log and infers which visitor archetype best explains them,
//! together with a confidence score.
//!
//! # Guarantees
//!
//! - **Bounded**: the event log never holds more than `max_events` entries
//! - **Total**: tracking and inference never return an error to the caller;
//!   failures degrade to dropped events or the `new_visitor` persona
//! - **Local**: inference reads only the local log, never the network
//! - **Observable**: every swallowed failure is logged and counted
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Persona Engine                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │  Event Log  │──▶│  Inference  │──▶│  Consumer   │        │
//! │  │  (bounded)  │   │   Engine    │   │ (5s timer)  │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │         │                 ▲                 │               │
//! │         ▼                 │                 ▼               │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │ KeyValue    │   │ Rule Table  │   │   Remote    │        │
//! │  │   Store     │   │ (16 events) │   │ sync / push │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use persona_engine::config::{InferenceConfig, TrackingConfig};
//! use persona_engine::events::{types::PageView, EventData, EventLog};
//! use persona_engine::inference::InferenceEngine;
//! use persona_engine::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! let log = Arc::new(EventLog::new(
//!     Arc::new(MemoryStore::new()),
//!     &TrackingConfig::default(),
//! ));
//! log.track(EventData::PageView(PageView {
//!     path: "/pricing".to_string(),
//!     duration: Some(150.0),
//!     title: None,
//! }));
//!
//! let engine = InferenceEngine::new(log, InferenceConfig::default());
//! let inference = engine.calculate_persona();
//! // One event is not enough to decide
//! assert!(inference.is_new_visitor());
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod events;
pub mod inference;
pub mod remote;
pub mod scoring;
pub mod storage;
pub mod telemetry;

// Re-export key types at crate root for convenience
pub use config::{Config, EndpointConfig, InferenceConfig, InferenceConfigUpdate, TrackingConfig};
pub use consumer::{ConsumerHandle, PersonaConsumer};
pub use events::{EventData, EventLog, EventName, EventStats, SyncOutcome, TrackingEvent};
pub use inference::{InferenceEngine, PersonaInference};
pub use remote::{OfflineRemote, RemoteSink};
pub use scoring::{Persona, PersonaScores, RuleTable, STANDARD_RULES};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SharedStore};
pub use telemetry::{SharedTelemetry, TelemetryEvent, TelemetryLog, TelemetrySink};

#[cfg(feature = "http")]
pub use remote::HttpRemote;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
