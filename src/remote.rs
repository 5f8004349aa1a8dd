//! Remote endpoints for event sync and persona push.
//!
//! Both calls are best-effort. They return explicit results and the caller
//! decides whether to retry; nothing here retries on its own.

use crate::error::RemoteError;
use crate::events::TrackingEvent;
use crate::scoring::Persona;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Destination for synced events and inferred personas.
pub trait RemoteSink: Send + Sync {
    /// Deliver the whole event batch. Only a 2xx response counts as success.
    fn send_events(
        &self,
        events: &[TrackingEvent],
    ) -> impl Future<Output = Result<SyncReceipt, RemoteError>> + Send;

    /// Report the current persona.
    fn push_persona(&self, persona: Persona)
        -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Body of the sync call.
#[derive(Debug, Serialize)]
pub struct SyncPayload<'a> {
    pub events: &'a [TrackingEvent],
}

/// Body of the persona push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaPayload {
    pub persona: Persona,
}

/// Confirmation of a successful sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReceipt {
    pub status: u16,
    /// Response body, informational only
    pub body: Option<serde_json::Value>,
}

/// Sink used when no endpoint is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineRemote;

impl RemoteSink for OfflineRemote {
    async fn send_events(&self, _events: &[TrackingEvent]) -> Result<SyncReceipt, RemoteError> {
        Err(RemoteError::Network("no remote endpoint configured".to_string()))
    }

    async fn push_persona(&self, _persona: Persona) -> Result<(), RemoteError> {
        Err(RemoteError::Network("no remote endpoint configured".to_string()))
    }
}

#[cfg(feature = "http")]
pub use http::HttpRemote;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::config::EndpointConfig;

    /// HTTP client for the analytics and personalization endpoints.
    #[derive(Debug, Clone)]
    pub struct HttpRemote {
        config: EndpointConfig,
        client: reqwest::Client,
    }

    impl HttpRemote {
        pub fn new(config: EndpointConfig) -> Result<Self, RemoteError> {
            let client = reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|e| RemoteError::Network(format!("failed to create HTTP client: {e}")))?;

            Ok(Self { config, client })
        }

        pub fn config(&self) -> &EndpointConfig {
            &self.config
        }

        async fn post<T: Serialize + ?Sized>(
            &self,
            url: &str,
            body: &T,
        ) -> Result<reqwest::Response, RemoteError> {
            let body =
                serde_json::to_vec(body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
            let response = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| RemoteError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(RemoteError::Server {
                    status: status.as_u16(),
                    message,
                });
            }

            Ok(response)
        }
    }

    impl RemoteSink for HttpRemote {
        async fn send_events(&self, events: &[TrackingEvent]) -> Result<SyncReceipt, RemoteError> {
            let response = self
                .post(&self.config.sync_url(), &SyncPayload { events })
                .await?;
            let status = response.status().as_u16();

            // The body is informational; an unparseable one still counts as delivered.
            let body = match response.text().await {
                Ok(text) if !text.trim().is_empty() => serde_json::from_str(&text).ok(),
                _ => None,
            };

            Ok(SyncReceipt { status, body })
        }

        async fn push_persona(&self, persona: Persona) -> Result<(), RemoteError> {
            self.post(&self.config.persona_url(), &PersonaPayload { persona })
                .await?;
            Ok(())
        }
    }

}
