//! Interaction events and the bounded log that holds them.

pub mod log;
pub mod types;

pub use log::{EventLog, EventStats, PageContext, SyncOutcome, QUOTA_FALLBACK_EVENTS};
pub use types::{EventData, EventName, TrackingEvent};
