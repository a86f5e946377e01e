//! Voxbridge server library logic.

pub mod api;
pub mod call;
pub mod config;
pub mod media;

use axum::{routing::get, Extension, Json, Router};
use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use voxbridge_resilience::{CancelToken, ResilienceManager};
use voxbridge_voice::{
    ConversationBackend, DeepgramProvider, ElevenLabsSynthesizer, HttpConversationBackend,
    OrchestratorClient, SpeechProvider, SpeechSynthesizer,
};

/// Application state shared across all request handlers and calls.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// One circuit breaker per downstream dependency, shared by every call.
    pub resilience: ResilienceManager,
    /// Opens streaming recognition sessions.
    pub speech: Arc<dyn SpeechProvider>,
    /// Renders replies to audio.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Conversational backend client.
    pub orchestrator: Arc<OrchestratorClient>,
    /// Prometheus exposition handle; `None` when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Cancelled on shutdown; every call runs under a child of this token.
    pub shutdown: CancelToken,
}

impl AppState {
    /// Builds state around the given provider implementations.
    pub fn new(
        config: Config,
        speech: Arc<dyn SpeechProvider>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        backend: Arc<dyn ConversationBackend>,
    ) -> Self {
        let resilience = ResilienceManager::new(
            config.resilience.breaker_config(),
            config.resilience.reconnect_policy(),
        );
        let orchestrator = Arc::new(OrchestratorClient::new(
            backend,
            &config.orchestrator,
            &resilience,
        ));
        Self {
            config,
            resilience,
            speech,
            synthesizer,
            orchestrator,
            metrics: None,
            shutdown: CancelToken::new(),
        }
    }

    /// Builds state backed by the network providers named in `config`.
    pub fn from_config(config: Config, http: reqwest::Client) -> Self {
        let speech = Arc::new(DeepgramProvider::new(&config.stt));
        let synthesizer = Arc::new(ElevenLabsSynthesizer::new(http.clone(), &config.tts));
        let backend = Arc::new(HttpConversationBackend::new(http, &config.orchestrator));
        Self::new(config, speech, synthesizer, backend)
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(api::ready_handler))
        .route("/metrics", get(api::metrics_handler))
        .route("/media", get(api::media_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
