//! Persona inference over the event log.
//!
//! Each run reads the whole log, weights every event by its age and its
//! event-type weight, accumulates rule points per persona and picks the
//! leader. Any internal failure yields the `new_visitor` result.

use crate::config::{InferenceConfig, InferenceConfigUpdate};
use crate::error::InferenceError;
use crate::events::{EventLog, TrackingEvent};
use crate::scoring::{Persona, PersonaScores, RuleTable, STANDARD_RULES};
use crate::telemetry::{NoopTelemetry, SharedTelemetry, TelemetryEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Events at most this old count fully.
pub const FULL_WEIGHT_MINUTES: f64 = 5.0;

/// Events at least this old count at [`MIN_TEMPORAL_WEIGHT`].
pub const DECAY_FLOOR_MINUTES: f64 = 30.0;

pub const MIN_TEMPORAL_WEIGHT: f64 = 0.5;

/// Confidence ceiling. Inference never reports full certainty.
pub const MAX_CONFIDENCE: f64 = 0.95;

/// Decay factor for an event `age_minutes` old, in `[0.5, 1.0]`.
///
/// Linear between the 5 and 30 minute bounds.
pub fn temporal_weight(age_minutes: f64) -> f64 {
    if age_minutes.is_nan() || age_minutes <= FULL_WEIGHT_MINUTES {
        return 1.0;
    }
    if age_minutes >= DECAY_FLOOR_MINUTES {
        return MIN_TEMPORAL_WEIGHT;
    }

    let progress =
        (age_minutes - FULL_WEIGHT_MINUTES) / (DECAY_FLOOR_MINUTES - FULL_WEIGHT_MINUTES);
    1.0 - progress * (1.0 - MIN_TEMPORAL_WEIGHT)
}

/// How dominant `top` is over `second`, in `[0, 0.95]`.
pub fn confidence(top: f64, second: f64) -> f64 {
    let sum = top + second;
    if sum.is_nan() || sum <= 0.0 {
        return 0.0;
    }
    (0.5 + 0.5 * (top - second) / sum).clamp(0.0, MAX_CONFIDENCE)
}

/// Result of one inference run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaInference {
    pub primary: Persona,
    /// Always in `[0, 0.95]`
    pub confidence: f64,
    pub scores: PersonaScores,
    pub events_analyzed: usize,
    pub timestamp: DateTime<Utc>,
}

impl PersonaInference {
    /// The neutral result for insufficient data, low scores or failures.
    pub fn new_visitor(events_analyzed: usize, timestamp: DateTime<Utc>) -> Self {
        Self {
            primary: Persona::NewVisitor,
            confidence: 0.0,
            scores: PersonaScores::new(),
            events_analyzed,
            timestamp,
        }
    }

    pub fn is_new_visitor(&self) -> bool {
        self.primary == Persona::NewVisitor
    }
}

/// Infers the dominant persona from an [`EventLog`].
pub struct InferenceEngine {
    log: Arc<EventLog>,
    rules: RuleTable,
    config: InferenceConfig,
    telemetry: SharedTelemetry,
}

impl InferenceEngine {
    /// Create an engine over `log` using the standard rule table.
    pub fn new(log: Arc<EventLog>, config: InferenceConfig) -> Self {
        Self {
            log,
            rules: STANDARD_RULES,
            config,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Apply a partial configuration update. Only later calculations see it.
    pub fn configure(&mut self, update: &InferenceConfigUpdate) {
        self.config.apply(update);
        tracing::debug!(config = ?self.config, "Inference configuration updated");
    }

    pub fn calculate_persona(&self) -> PersonaInference {
        self.calculate_persona_at(Utc::now())
    }

    /// Infer the persona as of `now`. Never fails; errors produce the
    /// `new_visitor` result.
    pub fn calculate_persona_at(&self, now: DateTime<Utc>) -> PersonaInference {
        match self.try_calculate(now) {
            Ok(inference) => {
                if self.config.debug {
                    tracing::info!(
                        persona = %inference.primary,
                        confidence = inference.confidence,
                        events = inference.events_analyzed,
                        "Persona calculated"
                    );
                }
                inference
            }
            Err(e) => {
                tracing::warn!("Persona inference failed, falling back to new_visitor: {e}");
                self.telemetry.record(TelemetryEvent::InferenceFailed {
                    reason: e.to_string(),
                });
                PersonaInference::new_visitor(0, now)
            }
        }
    }

    /// Nonzero scores as of now, highest first.
    pub fn score_breakdown(&self) -> Vec<(Persona, f64)> {
        let now = Utc::now();
        match self.log.try_events() {
            Ok(events) => self.score(&events, now).ranked(),
            Err(e) => {
                tracing::warn!("Score breakdown unavailable: {e}");
                Vec::new()
            }
        }
    }

    fn try_calculate(&self, now: DateTime<Utc>) -> Result<PersonaInference, InferenceError> {
        let events = self.log.try_events()?;
        let events_analyzed = events.len();

        if events_analyzed < self.config.min_events {
            return Ok(PersonaInference::new_visitor(events_analyzed, now));
        }

        let scores = self.score(&events, now);
        if let Some((persona, _)) = scores.iter().find(|(_, s)| !s.is_finite()) {
            return Err(InferenceError::NonFiniteScore {
                persona: persona.as_str(),
            });
        }

        let (leader, top, second) = scores.leader();
        if top <= 0.0 || top < self.config.score_threshold {
            return Ok(PersonaInference {
                scores,
                ..PersonaInference::new_visitor(events_analyzed, now)
            });
        }

        Ok(PersonaInference {
            primary: leader,
            confidence: confidence(top, second),
            scores,
            events_analyzed,
            timestamp: now,
        })
    }

    fn score(&self, events: &[TrackingEvent], now: DateTime<Utc>) -> PersonaScores {
        let mut scores = PersonaScores::new();

        for event in events {
            let decay = if self.config.decay_older_events {
                temporal_weight(event.age_minutes(now))
            } else {
                1.0
            };

            let evaluation = self.rules.evaluate(&event.data);
            for failure in &evaluation.failures {
                tracing::warn!(rule = failure.label, "Skipping rule: {}", failure.error);
                self.telemetry.record(TelemetryEvent::RuleFailed {
                    rule: failure.label,
                    reason: failure.error.to_string(),
                });
            }

            for matched in &evaluation.matched {
                for &(persona, points) in matched.points {
                    scores.add(persona, points * evaluation.weight * decay);
                }
                if self.config.debug {
                    tracing::debug!(
                        event = %event.name(),
                        rule = matched.label,
                        weight = evaluation.weight,
                        decay,
                        "Rule matched"
                    );
                }
            }
        }

        scores
    }
}
