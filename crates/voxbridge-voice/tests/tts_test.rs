use async_trait::async_trait;
use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use voxbridge_resilience::{BreakerConfig, BreakerState, ResilienceManager};
use voxbridge_types::Dependency;
use voxbridge_voice::{
    ElevenLabsSynthesizer, SpeechSynthesizer, SynthesisRequest, TtsClient, TtsConfig, VoiceError,
};

/// Returns `samples` 16-bit samples of silence, optionally waiting for a
/// release signal first.
struct FixedSynth {
    samples: usize,
    calls: AtomicU32,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl SpeechSynthesizer for FixedSynth {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, VoiceError> {
        assert_eq!(request.sample_rate, 24_000);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(vec![0u8; self.samples * 2])
    }
}

fn synth(samples: usize, gate: Option<Arc<Notify>>) -> Arc<FixedSynth> {
    Arc::new(FixedSynth {
        samples,
        calls: AtomicU32::new(0),
        gate,
    })
}

#[tokio::test]
async fn test_pcm_is_converted_to_telephony_mulaw() {
    let provider = synth(2400, None);
    let tts = TtsClient::new(
        provider.clone(),
        TtsConfig::default(),
        &ResilienceManager::default(),
    );

    let mut rx = tts.synthesize("Thanks, let me check that.").await.unwrap();
    let chunk = rx.recv().await.expect("one chunk");
    assert_eq!(chunk.data.len(), 800);
    assert_eq!(chunk.sample_rate, 8000);
    assert_eq!(chunk.channels, 1);
    assert!(rx.recv().await.is_none());
    assert!(!tts.is_active());
}

#[tokio::test]
async fn test_empty_text_is_rejected_without_request() {
    let provider = synth(10, None);
    let tts = TtsClient::new(
        provider.clone(),
        TtsConfig::default(),
        &ResilienceManager::default(),
    );

    assert!(matches!(
        tts.synthesize("   ").await,
        Err(VoiceError::EmptyText)
    ));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversized_text_is_rejected_without_request() {
    let provider = synth(10, None);
    let tts = TtsClient::new(
        provider.clone(),
        TtsConfig::default(),
        &ResilienceManager::default(),
    );

    match tts.synthesize(&"a".repeat(5000)).await {
        Err(VoiceError::TextTooLong { len, limit }) => {
            assert_eq!(len, 5000);
            assert_eq!(limit, 4096);
        }
        other => panic!("Expected TextTooLong, got {:?}", other.map(|_| ())),
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert!(!tts.is_active());
}

#[tokio::test]
async fn test_concurrent_synthesis_is_already_active() {
    let gate = Arc::new(Notify::new());
    let provider = synth(300, Some(Arc::clone(&gate)));
    let tts = Arc::new(TtsClient::new(
        provider.clone(),
        TtsConfig::default(),
        &ResilienceManager::default(),
    ));

    let first = {
        let tts = Arc::clone(&tts);
        tokio::spawn(async move { tts.synthesize("first").await })
    };
    while provider.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(tts.is_active());
    assert!(matches!(
        tts.synthesize("second").await,
        Err(VoiceError::AlreadyActive)
    ));

    gate.notify_one();
    let mut rx = first.await.unwrap().unwrap();
    assert_eq!(rx.recv().await.unwrap().data.len(), 100);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    // Free again once the first synthesis completed.
    gate.notify_one();
    tts.synthesize("third").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deadline_counts_as_breaker_failure() {
    let gate = Arc::new(Notify::new());
    let resilience = ResilienceManager::new(
        BreakerConfig {
            max_failures: 1,
            reset_timeout: Duration::from_secs(30),
        },
        Default::default(),
    );
    let config = TtsConfig {
        timeout_ms: 500,
        ..TtsConfig::default()
    };
    let provider = synth(10, Some(gate));
    let tts = TtsClient::new(provider.clone(), config, &resilience);

    assert!(matches!(
        tts.synthesize("hello").await,
        Err(VoiceError::Timeout(500))
    ));
    assert!(!tts.is_active());
    assert_eq!(resilience.breaker(Dependency::Tts).state(), BreakerState::Open);

    // Open breaker short-circuits without reaching the provider.
    assert!(matches!(
        tts.synthesize("hello again").await,
        Err(VoiceError::CircuitOpen(name)) if name == "tts"
    ));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_synthesizer_request_shape() {
    async fn handler(
        Path(voice_id): Path<String>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let ok = voice_id == "voice-7"
            && query.get("output_format").map(String::as_str) == Some("pcm_24000")
            && headers.get("xi-api-key").and_then(|v| v.to_str().ok()) == Some("el-key")
            && body["text"] == "hello there"
            && body["voice_settings"]["stability"].is_number();
        if ok {
            (StatusCode::OK, vec![0u8; 600])
        } else {
            (StatusCode::BAD_REQUEST, b"unexpected request".to_vec())
        }
    }

    let base = spawn_server(Router::new().route("/v1/text-to-speech/{voice_id}", post(handler))).await;
    let config = TtsConfig {
        base_url: base,
        api_key: "el-key".to_string(),
        voice_id: "voice-7".to_string(),
        ..TtsConfig::default()
    };
    let synth = ElevenLabsSynthesizer::new(reqwest::Client::new(), &config);
    let tts = TtsClient::new(Arc::new(synth), config, &ResilienceManager::default());

    let mut rx = tts.synthesize("hello there").await.unwrap();
    assert_eq!(rx.recv().await.unwrap().data.len(), 100);
}

#[tokio::test]
async fn test_http_error_status_surfaces_provider_error() {
    let app = Router::new().route(
        "/v1/text-to-speech/{voice_id}",
        post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
    );
    let base = spawn_server(app).await;
    let config = TtsConfig {
        base_url: base,
        api_key: "wrong".to_string(),
        ..TtsConfig::default()
    };
    let resilience = ResilienceManager::default();
    let synth = ElevenLabsSynthesizer::new(reqwest::Client::new(), &config);
    let tts = TtsClient::new(Arc::new(synth), config, &resilience);

    match tts.synthesize("hello").await {
        Err(VoiceError::Provider { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("Expected Provider error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(resilience.breaker(Dependency::Tts).failure_count(), 1);
}
