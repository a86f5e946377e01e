//! Conversational orchestrator client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use voxbridge_observe::{correlation, metrics};
use voxbridge_resilience::{CircuitBreaker, ResilienceManager};
use voxbridge_types::Dependency;

use crate::config::OrchestratorConfig;
use crate::error::{outcome_of, VoiceError};

/// One caller turn sent to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorRequest {
    pub call_id: String,
    pub stream_id: String,
    pub transcript: String,
    pub utterance_seq: u64,
}

/// The orchestrator's answer to a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorReply {
    pub reply: String,
    /// Opaque instructions for the telephony side; passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<serde_json::Value>,
}

#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn respond(&self, request: &OrchestratorRequest) -> Result<OrchestratorReply, VoiceError>;
    async fn health(&self) -> Result<(), VoiceError>;
}

/// Shared, breaker-guarded client for the conversation backend.
pub struct OrchestratorClient {
    backend: Arc<dyn ConversationBackend>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
    health_timeout: Duration,
}

impl std::fmt::Debug for OrchestratorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorClient")
            .field("timeout", &self.timeout)
            .field("health_timeout", &self.health_timeout)
            .finish()
    }
}

impl OrchestratorClient {
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        config: &OrchestratorConfig,
        resilience: &ResilienceManager,
    ) -> Self {
        Self {
            backend,
            breaker: resilience.breaker(Dependency::Orchestrator),
            timeout: config.timeout(),
            health_timeout: config.health_timeout(),
        }
    }

    /// Sends one turn. Timeouts, transport errors and error statuses all
    /// count against the orchestrator breaker.
    pub async fn respond(
        &self,
        request: &OrchestratorRequest,
    ) -> Result<OrchestratorReply, VoiceError> {
        let started = Instant::now();
        let timeout = self.timeout;
        let result = self
            .breaker
            .call(|| async {
                tokio::time::timeout(timeout, self.backend.respond(request))
                    .await
                    .map_err(|_| VoiceError::Timeout(timeout.as_millis() as u64))?
            })
            .instrument(correlation::dependency_span(Dependency::Orchestrator))
            .await;
        metrics::record_dependency_request(
            Dependency::Orchestrator,
            outcome_of(&result),
            started.elapsed(),
        );

        let reply = result.map_err(|e| {
            metrics::record_error("orchestrator", "request");
            VoiceError::from(e)
        })?;
        if reply.reply.trim().is_empty() {
            metrics::record_error("orchestrator", "empty_reply");
            return Err(VoiceError::Protocol("orchestrator returned an empty reply".to_string()));
        }
        Ok(reply)
    }

    /// Probes backend health for readiness, through the same breaker.
    pub async fn health_check(&self) -> Result<(), VoiceError> {
        let timeout = self.health_timeout;
        self.breaker
            .call(|| async {
                tokio::time::timeout(timeout, self.backend.health())
                    .await
                    .map_err(|_| VoiceError::Timeout(timeout.as_millis() as u64))?
            })
            .instrument(correlation::dependency_span(Dependency::Orchestrator))
            .await
            .map_err(VoiceError::from)
    }
}

/// Orchestrator reached over HTTP: `POST /v1/turns`, `GET /health`.
#[derive(Clone)]
pub struct HttpConversationBackend {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpConversationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConversationBackend")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpConversationBackend {
    pub fn new(http: reqwest::Client, config: &OrchestratorConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.trim().is_empty()),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, VoiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(VoiceError::Provider {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ConversationBackend for HttpConversationBackend {
    async fn respond(&self, request: &OrchestratorRequest) -> Result<OrchestratorReply, VoiceError> {
        let builder = self
            .http
            .post(format!("{}/v1/turns", self.base_url))
            .json(request);
        let response = error_for_status(self.authorize(builder).send().await?).await?;
        Ok(response.json::<OrchestratorReply>().await?)
    }

    async fn health(&self) -> Result<(), VoiceError> {
        let builder = self.http.get(format!("{}/health", self.base_url));
        error_for_status(self.authorize(builder).send().await?).await?;
        Ok(())
    }
}
