//! Telephony media-stream protocol.
//!
//! The platform connects over a websocket and sends JSON text frames tagged
//! by `event`: `connected`, `start` (carries the stream and call ids),
//! `media` (base64 mu-law at 8 kHz), `mark` (echo of a mark we sent once
//! playback reaches it) and `stop`. Outbound we send `media` frames carrying
//! synthesized audio and a `mark` after each reply.
//!
//! The pipeline talks to the connection only through [`MediaSource`] and
//! [`MediaSink`], so calls can be driven in-process by tests.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use voxbridge_observe::metrics;
use voxbridge_types::{AudioEncoding, AudioFormat, AudioFrame};

use crate::call::CallError;

/// Stream identity announced by the `start` event.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStart {
    pub stream_id: String,
    pub call_id: Option<String>,
    pub format: AudioFormat,
}

/// A decoded inbound protocol event.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Connected,
    Start(StreamStart),
    Media(AudioFrame),
    /// Playback reached a mark we sent earlier.
    Mark(String),
    Stop,
}

impl MediaEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Start(_) => "start",
            Self::Media(_) => "media",
            Self::Mark(_) => "mark",
            Self::Stop => "stop",
        }
    }
}

/// A message to send back to the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Media { stream_id: String, payload: Vec<u8> },
    Mark { stream_id: String, name: String },
}

/// Read half of a media connection.
#[async_trait]
pub trait MediaSource: Send {
    /// Next protocol event, or `None` once the connection is gone.
    async fn next_event(&mut self) -> Option<MediaEvent>;
}

/// Write half of a media connection.
#[async_trait]
pub trait MediaSink: Send {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), CallError>;
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum InboundWire {
    Connected {},
    Start {
        start: StartPayload,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        mark: MarkPayload,
    },
    Stop {},
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    stream_sid: String,
    #[serde(default)]
    call_sid: Option<String>,
    #[serde(default)]
    media_format: Option<MediaFormatPayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaFormatPayload {
    encoding: String,
    sample_rate: u32,
    #[serde(default = "default_channels")]
    channels: u16,
}

fn default_channels() -> u16 {
    1
}

#[derive(Deserialize)]
struct MediaPayload {
    payload: String,
    #[serde(default)]
    track: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct MarkPayload {
    name: String,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundWire<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: OutboundMark<'a>,
    },
}

#[derive(Serialize)]
struct OutboundMedia {
    payload: String,
}

#[derive(Serialize)]
struct OutboundMark<'a> {
    name: &'a str,
}

impl MediaFormatPayload {
    fn to_format(&self) -> AudioFormat {
        let encoding = match self.encoding.as_str() {
            "audio/x-mulaw" | "mulaw" => AudioEncoding::Mulaw,
            _ => AudioEncoding::Linear16,
        };
        AudioFormat {
            encoding,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// Parses one inbound text frame.
///
/// Unknown events and frames from the outbound track yield `Ok(None)`.
/// `sequence` is the per-call frame counter; it advances on every media
/// frame returned.
pub fn parse_inbound(text: &str, sequence: &mut u64) -> Result<Option<MediaEvent>, CallError> {
    let wire: InboundWire = serde_json::from_str(text)?;
    let event = match wire {
        InboundWire::Connected {} => MediaEvent::Connected,
        InboundWire::Start { start } => {
            let format = start
                .media_format
                .as_ref()
                .map(MediaFormatPayload::to_format)
                .unwrap_or(AudioFormat::TELEPHONY);
            MediaEvent::Start(StreamStart {
                stream_id: start.stream_sid,
                call_id: start.call_sid,
                format,
            })
        }
        InboundWire::Media { media } => {
            if media.track.as_deref() == Some("outbound") {
                return Ok(None);
            }
            let data = BASE64
                .decode(media.payload.as_bytes())
                .map_err(|e| CallError::Media(format!("invalid media payload: {}", e)))?;
            let timestamp_ms = media
                .timestamp
                .as_deref()
                .and_then(|t| t.parse().ok())
                .unwrap_or(0);
            let frame = AudioFrame::new(data, AudioFormat::TELEPHONY, *sequence, timestamp_ms);
            *sequence += 1;
            MediaEvent::Media(frame)
        }
        InboundWire::Mark { mark } => MediaEvent::Mark(mark.name),
        InboundWire::Stop {} => MediaEvent::Stop,
        InboundWire::Other => return Ok(None),
    };
    Ok(Some(event))
}

/// Serializes an outbound message to its wire form.
pub fn encode_outbound(message: &OutboundMessage) -> Result<String, CallError> {
    let wire = match message {
        OutboundMessage::Media { stream_id, payload } => OutboundWire::Media {
            stream_sid: stream_id,
            media: OutboundMedia {
                payload: BASE64.encode(payload),
            },
        },
        OutboundMessage::Mark { stream_id, name } => OutboundWire::Mark {
            stream_sid: stream_id,
            mark: OutboundMark { name },
        },
    };
    Ok(serde_json::to_string(&wire)?)
}

/// [`MediaSource`] over the read half of an axum websocket.
pub struct WsMediaSource {
    stream: SplitStream<WebSocket>,
    sequence: u64,
}

impl WsMediaSource {
    pub fn new(stream: SplitStream<WebSocket>) -> Self {
        Self {
            stream,
            sequence: 0,
        }
    }
}

#[async_trait]
impl MediaSource for WsMediaSource {
    async fn next_event(&mut self) -> Option<MediaEvent> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(error = %e, "media websocket read failed");
                    return None;
                }
            };
            match msg {
                Message::Text(text) => match parse_inbound(text.as_str(), &mut self.sequence) {
                    Ok(Some(event)) => return Some(event),
                    Ok(None) => continue,
                    Err(e) => {
                        metrics::record_error("media", "malformed_message");
                        tracing::warn!(error = %e, "ignoring malformed media message");
                    }
                },
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }
}

/// [`MediaSink`] over the write half of an axum websocket.
pub struct WsMediaSink {
    sink: SplitSink<WebSocket, Message>,
}

impl WsMediaSink {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl MediaSink for WsMediaSink {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), CallError> {
        let text = encode_outbound(&message)?;
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| CallError::Media(format!("media websocket write failed: {}", e)))
    }
}
