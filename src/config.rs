//! Configuration for the persona engine.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration surface exposed to the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Event capture and sync
    pub tracking: TrackingConfig,

    /// Persona inference
    pub inference: InferenceConfig,

    /// Remote endpoints for event sync and persona push
    pub endpoints: EndpointConfig,

    /// Path for the persisted store and telemetry counters
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("persona-engine");

        Self {
            tracking: TrackingConfig::default(),
            inference: InferenceConfig::default(),
            endpoints: EndpointConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("persona-engine")
            .join("config.json")
    }

    /// File backing the durable key-value store.
    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("store.json")
    }

    /// File holding persisted telemetry counters.
    pub fn telemetry_path(&self) -> PathBuf {
        self.data_path.join("telemetry.json")
    }

    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }
}

/// Event capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Global capture toggle
    pub enabled: bool,
    pub debug: bool,
    /// Whether the captured log is periodically sent to the sync endpoint
    pub send_to_analytics: bool,
    /// Maximum number of events retained in the log
    pub max_events: usize,
    #[serde(with = "duration_ms", rename = "sync_interval_ms")]
    pub sync_interval: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            send_to_analytics: true,
            max_events: 100,
            sync_interval: Duration::from_millis(60_000),
        }
    }
}

/// Persona inference settings.
///
/// Owned by an [`InferenceEngine`](crate::inference::InferenceEngine); changes
/// affect only calculations made after them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Below this many events the result is always `new_visitor`
    pub min_events: usize,
    /// Minimum winning score for a persona to be assigned
    pub score_threshold: f64,
    /// Whether older events count less
    pub decay_older_events: bool,
    #[serde(with = "duration_ms", rename = "recalculation_interval_ms")]
    pub recalculation_interval: Duration,
    pub debug: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            min_events: 5,
            score_threshold: 20.0,
            decay_older_events: true,
            recalculation_interval: Duration::from_millis(5_000),
            debug: false,
        }
    }
}

/// Partial update for [`InferenceConfig`]. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfigUpdate {
    pub min_events: Option<usize>,
    pub score_threshold: Option<f64>,
    pub decay_older_events: Option<bool>,
    pub recalculation_interval_ms: Option<u64>,
    pub debug: Option<bool>,
}

impl InferenceConfig {
    pub fn apply(&mut self, update: &InferenceConfigUpdate) {
        if let Some(min_events) = update.min_events {
            self.min_events = min_events;
        }
        if let Some(threshold) = update.score_threshold {
            if threshold.is_finite() {
                self.score_threshold = threshold.max(0.0);
            }
        }
        if let Some(decay) = update.decay_older_events {
            self.decay_older_events = decay;
        }
        if let Some(ms) = update.recalculation_interval_ms {
            // A zero interval would spin the timer
            self.recalculation_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(debug) = update.debug {
            self.debug = debug;
        }
    }
}

/// Remote endpoint locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub sync_path: String,
    pub persona_path: String,
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            sync_path: "/api/analytics/events".to_string(),
            persona_path: "/api/personalization/persona".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Event sync endpoint URL.
    pub fn sync_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.sync_path)
    }

    /// Persona push endpoint URL.
    pub fn persona_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.persona_path)
    }
}

/// Serde support for Duration as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.tracking.enabled);
        assert!(config.tracking.send_to_analytics);
        assert_eq!(config.tracking.max_events, 100);
        assert_eq!(config.tracking.sync_interval, Duration::from_millis(60_000));
        assert_eq!(config.inference.min_events, 5);
        assert_eq!(config.inference.score_threshold, 20.0);
        assert!(config.inference.decay_older_events);
        assert_eq!(
            config.inference.recalculation_interval,
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"tracking": {"max_events": 20}}"#).unwrap();
        assert_eq!(config.tracking.max_events, 20);
        assert!(config.tracking.enabled);
        assert_eq!(config.inference.min_events, 5);
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(InferenceConfig::default()).unwrap();
        assert_eq!(json["recalculation_interval_ms"], 5000);
    }

    #[test]
    fn test_apply_update() {
        let mut config = InferenceConfig::default();
        config.apply(&InferenceConfigUpdate {
            min_events: Some(3),
            score_threshold: Some(f64::NAN),
            recalculation_interval_ms: Some(0),
            ..Default::default()
        });
        assert_eq!(config.min_events, 3);
        assert_eq!(config.score_threshold, 20.0);
        assert_eq!(config.recalculation_interval, Duration::from_millis(1));
        assert!(config.decay_older_events);
    }

    #[test]
    fn test_endpoint_urls() {
        let endpoints = EndpointConfig::new("http://127.0.0.1:8080/");
        assert_eq!(
            endpoints.sync_url(),
            "http://127.0.0.1:8080/api/analytics/events"
        );
        assert_eq!(
            endpoints.persona_url(),
            "http://127.0.0.1:8080/api/personalization/persona"
        );
    }
}
