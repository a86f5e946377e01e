//! Streaming speech-to-text.
//!
//! [`SttClient`] owns one provider session per call. Audio goes out through
//! an [`AudioSink`]; provider messages come back as raw text frames, are
//! decoded by [`messages`] and fanned out to subscribers as [`SttEvent`]s.

mod client;
mod deepgram;
pub mod messages;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use voxbridge_types::{BoundarySource, TranscriptionResult};

use crate::config::SttConfig;
use crate::error::VoiceError;

pub use client::{SttClient, SttState};
pub use deepgram::DeepgramProvider;

/// Event published on the transcript channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Interim or final transcript of the top alternative; never empty.
    Transcript(TranscriptionResult),
    /// The provider signalled the end of an utterance.
    Boundary(BoundarySource),
    /// The provider detected the start of speech. Informational.
    SpeechStarted,
    /// The session was lost and could not be re-established.
    Error(String),
}

/// Per-session recognition options sent to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SttSessionOptions {
    pub model: String,
    pub language: String,
    pub sample_rate: u32,
    pub encoding: String,
    pub channels: u16,
    pub punctuate: bool,
    pub interim_results: bool,
    pub utterance_end_ms: u32,
    pub vad_events: bool,
}

impl From<&SttConfig> for SttSessionOptions {
    fn from(config: &SttConfig) -> Self {
        Self {
            model: config.model.clone(),
            language: config.language.clone(),
            sample_rate: config.sample_rate,
            encoding: config.encoding.clone(),
            channels: 1,
            punctuate: config.punctuate,
            interim_results: config.interim_results,
            utterance_end_ms: config.utterance_end_ms,
            vad_events: config.vad_events,
        }
    }
}

impl SttSessionOptions {
    /// Options as URL query parameters.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("model", self.model.clone()),
            ("language", self.language.clone()),
            ("encoding", self.encoding.clone()),
            ("sample_rate", self.sample_rate.to_string()),
            ("channels", self.channels.to_string()),
            ("punctuate", self.punctuate.to_string()),
            ("interim_results", self.interim_results.to_string()),
            ("utterance_end_ms", self.utterance_end_ms.to_string()),
            ("vad_events", self.vad_events.to_string()),
        ]
    }
}

/// Outbound half of a provider session.
#[async_trait]
pub trait AudioSink: Send {
    async fn send(&mut self, audio: Vec<u8>) -> Result<(), VoiceError>;

    /// Asks the provider to flush pending results and end the session.
    async fn finish(&mut self) -> Result<(), VoiceError>;
}

/// An open provider session.
///
/// `messages` yields raw text frames. An `Err` item is a transport failure;
/// the end of the stream means the provider closed the session.
pub struct ProviderSession {
    pub sink: Box<dyn AudioSink>,
    pub messages: BoxStream<'static, Result<String, VoiceError>>,
}

/// A streaming recognition backend.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn connect(&self, options: &SttSessionOptions) -> Result<ProviderSession, VoiceError>;
}
