//! Persona inference: temporal decay, weighted rule scoring and confidence.

pub mod engine;

pub use engine::{
    confidence, temporal_weight, InferenceEngine, PersonaInference, MAX_CONFIDENCE,
    MIN_TEMPORAL_WEIGHT,
};
