//! Shared types for the voxbridge telephony voice bridge.
//!
//! This crate provides the data model that flows between the bridge's
//! layers: audio frames arriving from the telephony connection, synthesized
//! audio chunks going back to it, transcription results from the speech
//! recognizer, and the names of the downstream dependencies guarded by the
//! resilience layer.
//!
//! Every other crate in the workspace depends on `voxbridge-types` for these
//! definitions so that the provider clients and the call pipeline never
//! depend on each other just to share a struct.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod audio;

pub use audio::{AudioChunk, AudioEncoding, AudioFormat, AudioFrame};

/// A downstream dependency of the bridge.
///
/// Each dependency gets exactly one circuit breaker for the lifetime of the
/// process; the name is also the `dependency` label on metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    /// The streaming speech-to-text provider.
    Stt,
    /// The speech-synthesis provider.
    Tts,
    /// The conversational orchestrator backend.
    Orchestrator,
}

impl Dependency {
    /// All dependencies, in readiness-report order.
    pub const ALL: [Dependency; 3] = [Self::Stt, Self::Tts, Self::Orchestrator];

    /// Returns the string label for this dependency.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::Tts => "tts",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transcription produced by the speech recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Transcript text of the top alternative.
    pub text: String,
    /// Whether the provider considers this segment settled.
    pub is_final: bool,
    /// Provider confidence in `0.0..=1.0`.
    pub confidence: f32,
    /// Offset of the segment from the start of the stream, in seconds.
    pub start_time: f64,
    /// Duration of the segment, in seconds.
    pub duration: f64,
}

/// Where an utterance boundary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundarySource {
    /// The local energy-based voice-activity detector.
    Vad,
    /// An utterance-end message emitted by the ASR provider.
    Provider,
}

impl BoundarySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vad => "vad",
            Self::Provider => "provider",
        }
    }
}

/// Lifecycle status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Active,
    Ended,
}
