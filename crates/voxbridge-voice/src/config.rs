use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::VoiceError;

fn default_stt_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_stt_model() -> String {
    "nova-2-phonecall".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_stt_encoding() -> String {
    "mulaw".to_string()
}

fn default_true() -> bool {
    true
}

fn default_utterance_end_ms() -> u32 {
    1000
}

fn default_transcript_capacity() -> usize {
    64
}

fn default_close_drain_ms() -> u64 {
    100
}

/// Streaming speech-to-text settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Websocket endpoint of the live transcription API.
    #[serde(default = "default_stt_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_stt_encoding")]
    pub encoding: String,
    #[serde(default = "default_true")]
    pub punctuate: bool,
    #[serde(default = "default_true")]
    pub interim_results: bool,
    /// Silence, in milliseconds, after which the provider emits `UtteranceEnd`.
    #[serde(default = "default_utterance_end_ms")]
    pub utterance_end_ms: u32,
    #[serde(default = "default_true")]
    pub vad_events: bool,
    /// Bound of the transcript channel. Oldest items are dropped past this.
    #[serde(default = "default_transcript_capacity")]
    pub transcript_capacity: usize,
    /// Grace period between stopping the session and closing the transcript
    /// channel, so late results still reach subscribers.
    #[serde(default = "default_close_drain_ms")]
    pub close_drain_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            url: default_stt_url(),
            api_key: String::new(),
            model: default_stt_model(),
            language: default_language(),
            sample_rate: default_sample_rate(),
            encoding: default_stt_encoding(),
            punctuate: true,
            interim_results: true,
            utterance_end_ms: default_utterance_end_ms(),
            vad_events: true,
            transcript_capacity: default_transcript_capacity(),
            close_drain_ms: default_close_drain_ms(),
        }
    }
}

impl fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("sample_rate", &self.sample_rate)
            .field("encoding", &self.encoding)
            .field("utterance_end_ms", &self.utterance_end_ms)
            .field("transcript_capacity", &self.transcript_capacity)
            .finish()
    }
}

impl SttConfig {
    /// Checks the settings a session cannot start without.
    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.api_key.trim().is_empty() {
            return Err(VoiceError::Config("stt.api_key is not set".to_string()));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(VoiceError::Config(format!(
                "stt.url must be a ws:// or wss:// URL, got {:?}",
                self.url
            )));
        }
        if self.sample_rate == 0 {
            return Err(VoiceError::Config("stt.sample_rate must be positive".to_string()));
        }
        if self.transcript_capacity == 0 {
            return Err(VoiceError::Config(
                "stt.transcript_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn close_drain(&self) -> Duration {
        Duration::from_millis(self.close_drain_ms)
    }
}

fn default_tts_base_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_voice_id() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_tts_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

fn default_output_sample_rate() -> u32 {
    24_000
}

fn default_speed() -> f32 {
    1.0
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

fn default_tts_timeout_ms() -> u64 {
    10_000
}

fn default_chunk_capacity() -> usize {
    4
}

/// Speech-synthesis settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_tts_model")]
    pub model_id: String,
    /// PCM rate requested from the provider before telephony conversion.
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default = "default_tts_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_chunk_capacity")]
    pub chunk_capacity: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_tts_base_url(),
            api_key: String::new(),
            voice_id: default_voice_id(),
            model_id: default_tts_model(),
            output_sample_rate: default_output_sample_rate(),
            speed: default_speed(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            timeout_ms: default_tts_timeout_ms(),
            chunk_capacity: default_chunk_capacity(),
        }
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("output_sample_rate", &self.output_sample_rate)
            .field("speed", &self.speed)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl TtsConfig {
    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.api_key.trim().is_empty() {
            return Err(VoiceError::Config("tts.api_key is not set".to_string()));
        }
        if self.voice_id.trim().is_empty() {
            return Err(VoiceError::Config("tts.voice_id is not set".to_string()));
        }
        if !(0.7..=1.2).contains(&self.speed) {
            return Err(VoiceError::Config(
                "tts.speed must be between 0.7 and 1.2".to_string(),
            ));
        }
        for (name, value) in [
            ("stability", self.stability),
            ("similarity_boost", self.similarity_boost),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(VoiceError::Config(format!(
                    "tts.{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }
        if self.output_sample_rate == 0 {
            return Err(VoiceError::Config(
                "tts.output_sample_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_orchestrator_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_orchestrator_timeout_ms() -> u64 {
    8_000
}

fn default_health_timeout_ms() -> u64 {
    2_000
}

/// Conversational backend settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_orchestrator_url")]
    pub base_url: String,
    /// Optional bearer token sent with every request.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default = "default_orchestrator_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_orchestrator_url(),
            token: None,
            timeout_ms: default_orchestrator_timeout_ms(),
            health_timeout_ms: default_health_timeout_ms(),
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_ms", &self.timeout_ms)
            .field("health_timeout_ms", &self.health_timeout_ms)
            .finish()
    }
}

impl OrchestratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let stt = SttConfig {
            api_key: "dg-secret".to_string(),
            ..SttConfig::default()
        };
        let tts = TtsConfig {
            api_key: "el-secret".to_string(),
            ..TtsConfig::default()
        };
        let orch = OrchestratorConfig {
            token: Some("bearer-secret".to_string()),
            ..OrchestratorConfig::default()
        };

        assert!(!format!("{:?}", stt).contains("dg-secret"));
        assert!(!format!("{:?}", tts).contains("el-secret"));
        assert!(!format!("{:?}", orch).contains("bearer-secret"));
    }

    #[test]
    fn missing_keys_fail_validation() {
        assert!(matches!(
            SttConfig::default().validate(),
            Err(VoiceError::Config(_))
        ));
        assert!(matches!(
            TtsConfig::default().validate(),
            Err(VoiceError::Config(_))
        ));
    }

    #[test]
    fn complete_configs_validate() {
        let stt = SttConfig {
            api_key: "k".to_string(),
            ..SttConfig::default()
        };
        let tts = TtsConfig {
            api_key: "k".to_string(),
            ..TtsConfig::default()
        };
        assert!(stt.validate().is_ok());
        assert!(tts.validate().is_ok());
    }

    #[test]
    fn out_of_range_tts_settings_rejected() {
        let tts = TtsConfig {
            api_key: "k".to_string(),
            stability: 1.5,
            ..TtsConfig::default()
        };
        match tts.validate() {
            Err(VoiceError::Config(msg)) => assert!(msg.contains("stability"), "got: {}", msg),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn partial_config_uses_defaults() {
        let stt: SttConfig = serde_json::from_str(r#"{"model": "nova-3"}"#).unwrap();
        assert_eq!(stt.model, "nova-3");
        assert_eq!(stt.sample_rate, 8000);
        assert!(stt.interim_results);
        assert_eq!(stt.utterance_end_ms, 1000);
    }
}
