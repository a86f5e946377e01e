//! Wire messages of the live transcription websocket.

use serde::Deserialize;
use voxbridge_types::TranscriptionResult;

/// A server-to-client message, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderMessage {
    Metadata {
        #[serde(default)]
        request_id: Option<String>,
    },
    SpeechStarted {
        #[serde(default)]
        timestamp: f64,
    },
    UtteranceEnd {
        #[serde(default)]
        last_word_end: f64,
    },
    Results(ResultsMessage),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultsMessage {
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
    pub channel: ResultsChannel,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultsChannel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
}

impl ProviderMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ResultsMessage {
    /// Transcript of the first alternative, or `None` when it is missing or
    /// blank. Lower-ranked alternatives are ignored.
    pub fn into_transcription(self) -> Option<TranscriptionResult> {
        let top = self.channel.alternatives.into_iter().next()?;
        let text = top.transcript.trim();
        if text.is_empty() {
            return None;
        }
        Some(TranscriptionResult {
            text: text.to_string(),
            is_final: self.is_final,
            confidence: top.confidence,
            start_time: self.start,
            duration: self.duration,
        })
    }
}
