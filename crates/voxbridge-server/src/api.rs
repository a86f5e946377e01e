//! HTTP and websocket handlers.
//!
//! - `GET /ready`: readiness across providers and breakers
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /media`: telephony media-stream websocket, one call per connection

use crate::call;
use crate::media::{WsMediaSink, WsMediaSource};
use crate::AppState;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Extension,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;
use voxbridge_observe::readiness::{timed_check, CheckResult, ReadinessReport};

fn config_check(name: &str, result: Result<(), voxbridge_voice::VoiceError>) -> CheckResult {
    match result {
        Ok(()) => CheckResult::healthy(name, "configuration valid"),
        Err(e) => CheckResult::unhealthy(name, e.to_string()),
    }
}

/// `GET /ready`
///
/// Returns `200` when both provider configurations are usable and the
/// orchestrator answers its health probe, `503` otherwise. The body lists
/// every check and the current state of each circuit breaker.
pub async fn ready_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let orchestrator = timed_check("orchestrator", async {
        state
            .orchestrator
            .health_check()
            .await
            .map(|()| "reachable".to_string())
            .map_err(|e| e.to_string())
    })
    .await;

    let report = ReadinessReport::from_checks(vec![
        config_check("stt", state.config.stt.validate()),
        config_check("tts", state.config.tts.validate()),
        orchestrator,
    ]);
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "ready": report.ready,
            "checks": report.checks,
            "breakers": state.resilience.snapshots(),
        })),
    )
}

/// `GET /metrics`
pub async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// `GET /media`
pub async fn media_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state))
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    let source = WsMediaSource::new(receiver);
    let sink = WsMediaSink::new(sender);

    match call::run_call(state, source, sink).await {
        Ok(summary) => {
            tracing::debug!(
                call_id = %summary.call_id,
                end_reason = summary.end_reason.as_str(),
                "media connection finished"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "call ended with error");
        }
    }
}
