//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;
use voxbridge_audio::VadConfig;
use voxbridge_resilience::{BreakerConfig, ReconnectPolicy};
use voxbridge_voice::{OrchestratorConfig, SttConfig, TtsConfig};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Streaming speech-to-text provider.
    #[serde(default)]
    pub stt: SttConfig,

    /// Speech-synthesis provider.
    #[serde(default)]
    pub tts: TtsConfig,

    /// Conversational backend.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Per-call audio pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Circuit-breaker and reconnect tuning shared by all dependencies.
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "voxbridge_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Audio pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the per-call inbound ring buffer.
    #[serde(default = "default_ring_buffer_bytes")]
    pub ring_buffer_bytes: usize,

    /// Size of each slice forwarded to the recognizer.
    #[serde(default = "default_stt_chunk_bytes")]
    pub stt_chunk_bytes: usize,

    /// Size of each outbound media message (160 bytes = 20 ms of mu-law).
    #[serde(default = "default_outbound_frame_bytes")]
    pub outbound_frame_bytes: usize,

    /// Bound on voice-activity events waiting for the transcript consumer.
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,

    /// Bound on finished utterances waiting for a response.
    #[serde(default = "default_utterance_queue")]
    pub utterance_queue: usize,

    /// Spoken to the caller when the orchestrator cannot answer.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,

    #[serde(default)]
    pub vad: VadConfig,
}

/// Breaker and reconnect settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive failures that open a breaker.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// How long an open breaker waits before admitting a trial call.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ring_buffer_bytes() -> usize {
    16_000
}

fn default_stt_chunk_bytes() -> usize {
    160
}

fn default_outbound_frame_bytes() -> usize {
    160
}

fn default_event_queue() -> usize {
    64
}

fn default_utterance_queue() -> usize {
    4
}

fn default_fallback_message() -> String {
    "I'm sorry, I'm having trouble right now. Please hold on a moment.".to_string()
}

fn default_max_failures() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_bytes: default_ring_buffer_bytes(),
            stt_chunk_bytes: default_stt_chunk_bytes(),
            outbound_frame_bytes: default_outbound_frame_bytes(),
            event_queue: default_event_queue(),
            utterance_queue: default_utterance_queue(),
            fallback_message: default_fallback_message(),
            vad: VadConfig::default(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            reset_timeout_ms: default_reset_timeout_ms(),
            reconnect_attempts: default_reconnect_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ResilienceConfig {
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            max_failures: self.max_failures,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.backoff_multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but describes a pipeline that cannot run.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Checks the settings the process cannot run without.
    ///
    /// Provider credentials are not checked here. A bridge with a missing
    /// key still starts and reports itself not ready.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pipeline = &self.pipeline;
        if pipeline.stt_chunk_bytes == 0 || pipeline.outbound_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "pipeline chunk sizes must be positive".to_string(),
            ));
        }
        if pipeline.stt_chunk_bytes > pipeline.ring_buffer_bytes {
            return Err(ConfigError::Invalid(format!(
                "pipeline.stt_chunk_bytes ({}) exceeds pipeline.ring_buffer_bytes ({})",
                pipeline.stt_chunk_bytes, pipeline.ring_buffer_bytes
            )));
        }
        if pipeline.event_queue == 0 || pipeline.utterance_queue == 0 {
            return Err(ConfigError::Invalid(
                "pipeline queue sizes must be positive".to_string(),
            ));
        }
        if self.resilience.max_failures == 0 {
            return Err(ConfigError::Invalid(
                "resilience.max_failures must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VOXBRIDGE_HOST` overrides `server.host`
/// - `VOXBRIDGE_PORT` overrides `server.port`
/// - `VOXBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `VOXBRIDGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `VOXBRIDGE_STT_API_KEY` overrides `stt.api_key`
/// - `VOXBRIDGE_TTS_API_KEY` overrides `tts.api_key`
/// - `VOXBRIDGE_ORCHESTRATOR_URL` overrides `orchestrator.base_url`
/// - `VOXBRIDGE_ORCHESTRATOR_TOKEN` overrides `orchestrator.token`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting pipeline settings are unusable.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Applies `VOXBRIDGE_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("VOXBRIDGE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("VOXBRIDGE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("VOXBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("VOXBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = lookup("VOXBRIDGE_STT_API_KEY") {
        config.stt.api_key = key;
    }
    if let Some(key) = lookup("VOXBRIDGE_TTS_API_KEY") {
        config.tts.api_key = key;
    }
    if let Some(url) = lookup("VOXBRIDGE_ORCHESTRATOR_URL") {
        config.orchestrator.base_url = url;
    }
    if let Some(token) = lookup("VOXBRIDGE_ORCHESTRATOR_TOKEN") {
        config.orchestrator.token = Some(token).filter(|t| !t.trim().is_empty());
    }
}
