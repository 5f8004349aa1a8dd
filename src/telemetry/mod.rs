//! Telemetry for failures the engine absorbs instead of raising.
//!
//! Every degraded path (dropped event, truncated log, failing rule, failed
//! sync) is logged through `tracing` and reported to a [`TelemetrySink`] so
//! the embedding application can decide what to do about it.

pub mod log;

pub use log::{
    create_shared_telemetry, create_shared_telemetry_with_persistence, NoopTelemetry,
    SharedTelemetry, TelemetryEvent, TelemetryLog, TelemetrySink, TelemetryStats,
};
