//! Speech synthesis.
//!
//! [`TtsClient`] asks a [`SpeechSynthesizer`] for 16-bit PCM at the
//! configured provider rate, converts it to the telephony line format and
//! hands it back on a small bounded channel.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::Instrument;
use voxbridge_audio::pcm16le_to_mulaw;
use voxbridge_observe::{correlation, metrics};
use voxbridge_resilience::{CircuitBreaker, ResilienceManager};
use voxbridge_types::{AudioChunk, Dependency};

use crate::config::TtsConfig;
use crate::error::{outcome_of, VoiceError};

/// Maximum text accepted for one synthesis (4 KiB). Replies longer than this
/// are a backend bug, not something to read out over the phone.
const MAX_TTS_INPUT_BYTES: usize = 4 * 1024;

/// Provider-independent synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub model_id: String,
    pub output_format: &'static str,
    pub sample_rate: u32,
    pub speed: f32,
    pub stability: f32,
    pub similarity_boost: f32,
}

/// A speech-synthesis backend returning raw 16-bit little-endian mono PCM
/// at `request.sample_rate`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, VoiceError>;
}

/// Text-to-speech client for one call. One synthesis may be in flight at a
/// time.
pub struct TtsClient {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    config: TtsConfig,
    breaker: Arc<CircuitBreaker>,
    active: AtomicBool,
}

impl std::fmt::Debug for TtsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsClient")
            .field("config", &self.config)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Clears the in-flight flag when a synthesis ends, however it ends.
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TtsClient {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: TtsConfig,
        resilience: &ResilienceManager,
    ) -> Self {
        Self {
            synthesizer,
            config,
            breaker: resilience.breaker(Dependency::Tts),
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Renders `text` and returns a receiver yielding the audio.
    ///
    /// The provider call goes through the TTS circuit breaker under the
    /// configured deadline. The converted audio is delivered as a single
    /// telephony-format chunk.
    pub async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<AudioChunk>, VoiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::EmptyText);
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::TextTooLong {
                len: text.len(),
                limit: MAX_TTS_INPUT_BYTES,
            });
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VoiceError::AlreadyActive);
        }
        let _active = ActiveGuard(&self.active);

        let request = self.request_for(text);
        let deadline = self.config.timeout();
        let started = Instant::now();
        let result = self
            .breaker
            .call(|| with_deadline(deadline, self.synthesizer.synthesize(&request)))
            .instrument(correlation::dependency_span(Dependency::Tts))
            .await;
        let latency = started.elapsed();
        metrics::record_dependency_request(Dependency::Tts, outcome_of(&result), latency);
        let pcm = result.map_err(|e| {
            metrics::record_error("tts", "synthesis");
            VoiceError::from(e)
        })?;

        let audio = pcm16le_to_mulaw(&pcm, request.sample_rate);
        tracing::debug!(
            pcm_bytes = pcm.len(),
            mulaw_bytes = audio.len(),
            latency_ms = latency.as_millis() as u64,
            "synthesis complete"
        );

        let (tx, rx) = mpsc::channel(self.config.chunk_capacity.max(1));
        if let Err(mpsc::error::TrySendError::Full(chunk)) = tx.try_send(AudioChunk::telephony(audio)) {
            metrics::record_dropped("tts_chunk", 1);
            tracing::warn!(bytes = chunk.data.len(), "tts chunk channel full, dropping chunk");
        }
        Ok(rx)
    }

    /// Marks the client inactive.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn close(&self) {
        self.stop();
    }

    fn request_for(&self, text: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_string(),
            voice_id: self.config.voice_id.clone(),
            model_id: self.config.model_id.clone(),
            output_format: "pcm",
            sample_rate: self.config.output_sample_rate,
            speed: self.config.speed,
            stability: self.config.stability,
            similarity_boost: self.config.similarity_boost,
        }
    }
}

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, VoiceError>
where
    F: std::future::Future<Output = Result<T, VoiceError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(VoiceError::Timeout(deadline.as_millis() as u64)),
    }
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    speed: f32,
}

#[derive(Serialize)]
struct ElevenLabsBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

/// Synthesis over the ElevenLabs-style HTTP API.
#[derive(Clone)]
pub struct ElevenLabsSynthesizer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for ElevenLabsSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsSynthesizer")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl ElevenLabsSynthesizer {
    pub fn new(http: reqwest::Client, config: &TtsConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, VoiceError> {
        let url = format!("{}/v1/text-to-speech/{}", self.base_url, request.voice_id);
        let output_format = format!("{}_{}", request.output_format, request.sample_rate);
        let body = ElevenLabsBody {
            text: &request.text,
            model_id: &request.model_id,
            voice_settings: VoiceSettings {
                stability: request.stability,
                similarity_boost: request.similarity_boost,
                speed: request.speed,
            },
        };

        let response = self
            .http
            .post(url)
            .query(&[("output_format", output_format.as_str())])
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_voice_settings() {
        struct Never;
        #[async_trait]
        impl SpeechSynthesizer for Never {
            async fn synthesize(&self, _: &SynthesisRequest) -> Result<Vec<u8>, VoiceError> {
                unreachable!()
            }
        }

        let config = TtsConfig {
            voice_id: "voice-1".to_string(),
            speed: 1.1,
            ..TtsConfig::default()
        };
        let client = TtsClient::new(Arc::new(Never), config, &ResilienceManager::default());
        let request = client.request_for("hello");
        assert_eq!(request.voice_id, "voice-1");
        assert_eq!(request.output_format, "pcm");
        assert_eq!(request.sample_rate, 24_000);
        assert_eq!(request.speed, 1.1);
    }
}
