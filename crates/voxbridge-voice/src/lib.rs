//! Provider clients for the voxbridge telephony voice bridge.
//!
//! Each downstream service is reached through a small provider trait so the
//! call pipeline never talks to a vendor SDK directly:
//!
//! - [`SttClient`] streams caller audio to a [`SpeechProvider`] and publishes
//!   transcripts and utterance boundaries as [`SttEvent`]s.
//! - [`TtsClient`] renders reply text through a [`SpeechSynthesizer`] and
//!   hands back telephony-format audio.
//! - [`OrchestratorClient`] asks a [`ConversationBackend`] what to say next.
//!
//! Every client routes provider traffic through the process-wide circuit
//! breaker for its dependency, taken from a shared
//! [`ResilienceManager`](voxbridge_resilience::ResilienceManager).

pub mod config;
mod error;
pub mod orchestrator;
pub mod stt;
pub mod tts;

pub use config::{OrchestratorConfig, SttConfig, TtsConfig};
pub use error::VoiceError;
pub use orchestrator::{
    ConversationBackend, HttpConversationBackend, OrchestratorClient, OrchestratorReply,
    OrchestratorRequest,
};
pub use stt::{
    AudioSink, DeepgramProvider, ProviderSession, SpeechProvider, SttClient, SttEvent,
    SttSessionOptions, SttState,
};
pub use tts::{ElevenLabsSynthesizer, SpeechSynthesizer, SynthesisRequest, TtsClient};
