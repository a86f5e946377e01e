use async_trait::async_trait;
use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use voxbridge_resilience::{BreakerConfig, BreakerState, ReconnectPolicy, ResilienceManager};
use voxbridge_types::Dependency;
use voxbridge_voice::{
    ConversationBackend, HttpConversationBackend, OrchestratorClient, OrchestratorConfig,
    OrchestratorReply, OrchestratorRequest, VoiceError,
};

fn request(text: &str) -> OrchestratorRequest {
    OrchestratorRequest {
        call_id: "call-1".to_string(),
        stream_id: "MZ123".to_string(),
        transcript: text.to_string(),
        utterance_seq: 1,
    }
}

fn fragile_manager() -> ResilienceManager {
    ResilienceManager::new(
        BreakerConfig {
            max_failures: 2,
            reset_timeout: Duration::from_secs(30),
        },
        ReconnectPolicy::default(),
    )
}

/// Backend that never answers.
struct Hanging {
    calls: AtomicU32,
}

#[async_trait]
impl ConversationBackend for Hanging {
    async fn respond(&self, _: &OrchestratorRequest) -> Result<OrchestratorReply, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn health(&self) -> Result<(), VoiceError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_open_breaker_then_short_circuit() {
    let backend = Arc::new(Hanging {
        calls: AtomicU32::new(0),
    });
    let resilience = fragile_manager();
    let client = OrchestratorClient::new(
        backend.clone(),
        &OrchestratorConfig {
            timeout_ms: 1_000,
            ..OrchestratorConfig::default()
        },
        &resilience,
    );

    for _ in 0..2 {
        assert!(matches!(
            client.respond(&request("hello")).await,
            Err(VoiceError::Timeout(1_000))
        ));
    }
    assert_eq!(
        resilience.breaker(Dependency::Orchestrator).state(),
        BreakerState::Open
    );

    assert!(matches!(
        client.respond(&request("hello")).await,
        Err(VoiceError::CircuitOpen(_))
    ));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert!(matches!(
        client.health_check().await,
        Err(VoiceError::CircuitOpen(_))
    ));
}

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn turns(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer orch-token") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    let transcript = body["transcript"].as_str().unwrap_or_default();
    if transcript == "silence please" {
        return (StatusCode::OK, Json(json!({"reply": "   "})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "reply": format!("You said: {}", transcript),
            "actions": {"transfer": false},
        })),
    )
}

fn backend_app() -> Router {
    Router::new()
        .route("/v1/turns", post(turns))
        .route("/health", get(|| async { "ok" }))
}

fn http_client(base_url: String, token: Option<&str>, resilience: &ResilienceManager) -> OrchestratorClient {
    let config = OrchestratorConfig {
        base_url,
        token: token.map(str::to_string),
        ..OrchestratorConfig::default()
    };
    let backend = HttpConversationBackend::new(reqwest::Client::new(), &config);
    OrchestratorClient::new(Arc::new(backend), &config, resilience)
}

#[tokio::test]
async fn test_http_backend_round_trip() {
    let base = spawn_server(backend_app()).await;
    let resilience = ResilienceManager::default();
    let client = http_client(base, Some("orch-token"), &resilience);

    let reply = client.respond(&request("where is my order")).await.unwrap();
    assert_eq!(reply.reply, "You said: where is my order");
    assert_eq!(reply.actions, Some(json!({"transfer": false})));
    client.health_check().await.unwrap();
}

#[tokio::test]
async fn test_http_error_status_counts_as_failure() {
    let base = spawn_server(backend_app()).await;
    let resilience = fragile_manager();
    let client = http_client(base, None, &resilience);

    match client.respond(&request("hello")).await {
        Err(VoiceError::Provider { status, .. }) => assert_eq!(status, 401),
        other => panic!("Expected Provider error, got {:?}", other),
    }
    assert_eq!(resilience.breaker(Dependency::Orchestrator).failure_count(), 1);
}

#[tokio::test]
async fn test_empty_reply_is_an_error() {
    let base = spawn_server(backend_app()).await;
    let resilience = ResilienceManager::default();
    let client = http_client(base, Some("orch-token"), &resilience);

    assert!(matches!(
        client.respond(&request("silence please")).await,
        Err(VoiceError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_unreachable_backend_fails_health() {
    let resilience = ResilienceManager::default();
    let client = http_client("http://127.0.0.1:9".to_string(), None, &resilience);
    assert!(client.health_check().await.is_err());
}

/// Backend recording the span each request runs under.
#[derive(Default)]
struct SpanRecording {
    spans: std::sync::Mutex<Vec<Option<&'static str>>>,
}

#[async_trait]
impl ConversationBackend for SpanRecording {
    async fn respond(&self, _: &OrchestratorRequest) -> Result<OrchestratorReply, VoiceError> {
        let name = tracing::Span::current().metadata().map(|m| m.name());
        self.spans.lock().unwrap().push(name);
        Ok(OrchestratorReply {
            reply: "ok".to_string(),
            actions: None,
        })
    }

    async fn health(&self) -> Result<(), VoiceError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_requests_run_under_dependency_span() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = Arc::new(SpanRecording::default());
    let resilience = ResilienceManager::default();
    let client = OrchestratorClient::new(
        backend.clone(),
        &OrchestratorConfig::default(),
        &resilience,
    );

    client.respond(&request("hello")).await.unwrap();
    assert_eq!(*backend.spans.lock().unwrap(), vec![Some("dependency")]);
}
