//! Per-call pipeline.
//!
//! One call runs three activities under a shared cancellation token:
//!
//! - the connection task reads media frames, feeds the voice-activity
//!   detector and forwards audio to the recognizer through a ring buffer;
//! - the transcript consumer merges recognizer and detector events and turns
//!   them into complete utterances;
//! - the responder asks the orchestrator for a reply to each utterance,
//!   synthesizes it and writes the audio back to the caller.
//!
//! Each utterance produces at most one reply, however many of its end
//! signals (final transcript, detector boundary, provider boundary) arrive.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;
use voxbridge_audio::{AudioRingBuffer, VadEvent, VoiceActivityDetector};
use voxbridge_observe::correlation;
use voxbridge_observe::metrics::{self, CallTracker, Direction};
use voxbridge_resilience::CancelToken;
use voxbridge_types::{AudioFormat, AudioFrame, BoundarySource, CallStatus, TranscriptionResult};
use voxbridge_voice::{
    OrchestratorClient, OrchestratorRequest, SttClient, SttEvent, TtsClient, VoiceError,
};

use crate::config::PipelineConfig;
use crate::media::{MediaEvent, MediaSink, MediaSource, OutboundMessage, StreamStart};
use crate::AppState;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("speech recognition could not be started: {0}")]
    SttSetup(#[source] VoiceError),

    #[error("media error: {0}")]
    Media(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ConnectionClosed,
    SttSetupFailed,
    Shutdown,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionClosed => "connection_closed",
            Self::SttSetupFailed => "stt_setup_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// What closed an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceTrigger {
    FinalTranscript,
    VadBoundary,
    ProviderBoundary,
}

impl UtteranceTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FinalTranscript => "final_transcript",
            Self::VadBoundary => "vad_boundary",
            Self::ProviderBoundary => "provider_boundary",
        }
    }
}

impl From<BoundarySource> for UtteranceTrigger {
    fn from(source: BoundarySource) -> Self {
        match source {
            BoundarySource::Vad => Self::VadBoundary,
            BoundarySource::Provider => Self::ProviderBoundary,
        }
    }
}

/// A complete caller utterance, ready for the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Per-call sequence number, starting at 1.
    pub seq: u64,
    pub text: String,
    pub trigger: UtteranceTrigger,
}

/// Final accounting for a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSummary {
    pub call_id: String,
    pub stream_id: String,
    /// Call identifier assigned by the telephony platform, if it sent one.
    pub provider_call_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
    pub utterances: u64,
    pub fallbacks: u64,
    pub status: CallStatus,
    pub end_reason: EndReason,
}

/// Turns recognizer and detector events into utterances.
///
/// An utterance opens with the first transcript text after speech starts.
/// The first final transcript, or the first boundary that arrives while
/// interim text is pending, closes it. Speech detected by either the local
/// detector or the provider opens the next one, as does transcript text that
/// does not belong to the utterance just dispatched.
///
/// A late transcript belongs to the dispatched utterance when it repeats its
/// words. If that utterance was closed by a boundary on interim text, a final
/// that extends those words belongs to it as well.
#[derive(Debug)]
pub struct UtteranceSegmenter {
    armed: bool,
    pending: Option<String>,
    dispatched: Option<Dispatched>,
    next_seq: u64,
}

#[derive(Debug)]
struct Dispatched {
    words: Vec<String>,
    from_final: bool,
}

impl Dispatched {
    fn covers(&self, text: &str) -> bool {
        let words = normalized_words(text);
        if words == self.words {
            return true;
        }
        !self.from_final && !self.words.is_empty() && words.starts_with(&self.words)
    }
}

/// Lowercased words with punctuation stripped.
fn normalized_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect()
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceSegmenter {
    pub fn new() -> Self {
        Self {
            armed: true,
            pending: None,
            dispatched: None,
            next_seq: 1,
        }
    }

    pub fn on_speech_started(&mut self) {
        if !self.armed {
            self.armed = true;
            self.pending = None;
        }
    }

    pub fn on_transcript(&mut self, result: &TranscriptionResult) -> Option<Utterance> {
        if !self.armed {
            if self
                .dispatched
                .as_ref()
                .is_some_and(|dispatched| dispatched.covers(&result.text))
            {
                tracing::debug!(
                    chars = result.text.len(),
                    is_final = result.is_final,
                    "dropping transcript for an utterance already dispatched"
                );
                return None;
            }
            self.on_speech_started();
        }
        if result.is_final {
            return Some(self.close(result.text.clone(), UtteranceTrigger::FinalTranscript));
        }
        self.pending = Some(result.text.clone());
        None
    }

    pub fn on_boundary(&mut self, source: BoundarySource) -> Option<Utterance> {
        if !self.armed {
            return None;
        }
        let text = self.pending.take()?;
        Some(self.close(text, source.into()))
    }

    fn close(&mut self, text: String, trigger: UtteranceTrigger) -> Utterance {
        self.armed = false;
        self.pending = None;
        self.dispatched = Some(Dispatched {
            words: normalized_words(&text),
            from_final: trigger == UtteranceTrigger::FinalTranscript,
        });
        let seq = self.next_seq;
        self.next_seq += 1;
        Utterance { seq, text, trigger }
    }
}

/// Runs one call to completion over the given media connection.
///
/// Returns once the connection closes or the server shuts down. A recognizer
/// that cannot be started ends the call before any audio is exchanged.
pub async fn run_call<S, K>(
    state: Arc<AppState>,
    mut source: S,
    sink: K,
) -> Result<CallSummary, CallError>
where
    S: MediaSource,
    K: MediaSink + 'static,
{
    let call_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let cancel = state.shutdown.child();

    let start = loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => None,
            event = source.next_event() => event,
        };
        match event {
            Some(MediaEvent::Start(start)) => break start,
            Some(other) => {
                tracing::debug!(call_id = %call_id, event = other.kind(), "event before stream start");
            }
            None => {
                tracing::info!(call_id = %call_id, "media connection closed before stream start");
                let end_reason = if cancel.is_cancelled() {
                    EndReason::Shutdown
                } else {
                    EndReason::ConnectionClosed
                };
                return Ok(CallSummary {
                    call_id,
                    stream_id: String::new(),
                    provider_call_id: None,
                    started_at,
                    duration_ms: 0,
                    inbound_bytes: 0,
                    outbound_bytes: 0,
                    utterances: 0,
                    fallbacks: 0,
                    status: CallStatus::Ended,
                    end_reason,
                });
            }
        }
    };

    let span = correlation::call_span(&call_id, &start.stream_id);
    let session = CallSession {
        state,
        call_id,
        start,
        started_at,
        status: CallStatus::Active,
        cancel,
    };
    session.run(source, sink).instrument(span).await
}

/// State owned by one bridged call.
struct CallSession {
    state: Arc<AppState>,
    call_id: String,
    start: StreamStart,
    started_at: DateTime<Utc>,
    status: CallStatus,
    cancel: CancelToken,
}

impl CallSession {
    async fn run<S, K>(mut self, mut source: S, sink: K) -> Result<CallSummary, CallError>
    where
        S: MediaSource,
        K: MediaSink + 'static,
    {
        let state = Arc::clone(&self.state);
        let config = &state.config;
        let tracker = Arc::new(CallTracker::start());
        tracing::info!(
            provider_call_id = self.start.call_id.as_deref().unwrap_or(""),
            "call started"
        );
        if self.start.format != AudioFormat::TELEPHONY {
            tracing::warn!(
                encoding = self.start.format.encoding.as_str(),
                sample_rate = self.start.format.sample_rate,
                "unexpected media format, treating audio as 8 kHz mu-law"
            );
        }

        let stt = SttClient::new(
            Arc::clone(&state.speech),
            &config.stt,
            &state.resilience,
            &self.cancel,
        );
        let started = match stt.subscribe() {
            Ok(transcripts) => stt.start().await.map(|()| transcripts),
            Err(e) => Err(e),
        };
        let transcripts = match started {
            Ok(transcripts) => transcripts,
            Err(e) => {
                tracing::error!(error = %e, "speech recognition unavailable, ending call");
                metrics::record_error("pipeline", "stt_setup");
                stt.close().await;
                self.cancel.cancel();
                self.finish(tracker, EndReason::SttSetupFailed);
                return Err(CallError::SttSetup(e));
            }
        };

        let (vad_tx, vad_rx) = mpsc::channel(config.pipeline.event_queue);
        let (utterance_tx, utterance_rx) = mpsc::channel(config.pipeline.utterance_queue);

        let consumer = tokio::spawn(
            consume_transcripts(transcripts, vad_rx, utterance_tx, self.cancel.clone())
                .in_current_span(),
        );
        let responder = Responder {
            call_id: self.call_id.clone(),
            stream_id: self.start.stream_id.clone(),
            orchestrator: Arc::clone(&state.orchestrator),
            tts: TtsClient::new(
                Arc::clone(&state.synthesizer),
                config.tts.clone(),
                &state.resilience,
            ),
            tracker: Arc::clone(&tracker),
            fallback_message: config.pipeline.fallback_message.clone(),
            frame_bytes: config.pipeline.outbound_frame_bytes.max(1),
        };
        let responder = tokio::spawn(
            responder
                .run(utterance_rx, sink, self.cancel.clone())
                .in_current_span(),
        );

        let reason = pump_audio(
            &mut source,
            &stt,
            &vad_tx,
            &tracker,
            &self.cancel,
            &config.pipeline,
        )
        .await;

        self.cancel.cancel();
        drop(vad_tx);
        stt.close().await;
        for task in [consumer, responder] {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "call task failed");
            }
        }

        Ok(self.finish(tracker, reason))
    }

    fn finish(&mut self, tracker: Arc<CallTracker>, reason: EndReason) -> CallSummary {
        self.status = CallStatus::Ended;
        let stats = match Arc::try_unwrap(tracker) {
            Ok(tracker) => tracker.finish(reason.as_str()),
            Err(shared) => shared.stats(),
        };
        let summary = CallSummary {
            call_id: self.call_id.clone(),
            stream_id: self.start.stream_id.clone(),
            provider_call_id: self.start.call_id.clone(),
            started_at: self.started_at,
            duration_ms: stats.duration.as_millis() as u64,
            inbound_bytes: stats.inbound_bytes,
            outbound_bytes: stats.outbound_bytes,
            utterances: stats.utterances,
            fallbacks: stats.fallbacks,
            status: self.status,
            end_reason: reason,
        };
        tracing::info!(
            end_reason = reason.as_str(),
            duration_ms = summary.duration_ms,
            inbound_bytes = summary.inbound_bytes,
            outbound_bytes = summary.outbound_bytes,
            utterances = summary.utterances,
            fallbacks = summary.fallbacks,
            "call ended"
        );
        summary
    }
}

/// Reads the connection until it closes, feeding the detector and the
/// recognizer.
async fn pump_audio<S: MediaSource>(
    source: &mut S,
    stt: &SttClient,
    vad_tx: &mpsc::Sender<VadEvent>,
    tracker: &CallTracker,
    cancel: &CancelToken,
    pipeline: &PipelineConfig,
) -> EndReason {
    let mut ring = AudioRingBuffer::new(pipeline.ring_buffer_bytes);
    let mut vad = VoiceActivityDetector::new(pipeline.vad);
    let mut chunk = vec![0u8; pipeline.stt_chunk_bytes.max(1)];
    let mut forwarded: u64 = 0;
    let mut timestamp_ms: u64 = 0;

    let reason = loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break EndReason::Shutdown,
            event = source.next_event() => event,
        };
        let frame = match event {
            None | Some(MediaEvent::Stop) => break EndReason::ConnectionClosed,
            Some(MediaEvent::Media(frame)) => frame,
            Some(MediaEvent::Mark(name)) => {
                tracing::debug!(mark = %name, "playback reached mark");
                continue;
            }
            Some(other) => {
                tracing::debug!(event = other.kind(), "ignoring event mid-call");
                continue;
            }
        };

        tracker.add_audio(Direction::Inbound, frame.len());
        timestamp_ms = frame.timestamp_ms;
        if let Some(vad_event) = vad.process_mulaw(&frame.data) {
            if vad_tx.try_send(vad_event).is_err() {
                metrics::record_dropped("vad_event", 1);
                tracing::warn!(event = ?vad_event, "voice activity queue full, dropping event");
            }
        }

        let written = ring.write(&frame.data);
        if written < frame.len() {
            metrics::record_dropped("inbound_audio", (frame.len() - written) as u64);
            tracing::warn!(
                dropped = frame.len() - written,
                "inbound ring buffer full, dropping audio"
            );
        }
        while ring.available() >= chunk.len() {
            let n = ring.read(&mut chunk);
            let out = AudioFrame::new(
                chunk[..n].to_vec(),
                AudioFormat::TELEPHONY,
                forwarded,
                frame.timestamp_ms,
            );
            forwarded += 1;
            forward_audio(stt, &out).await;
        }
    };

    // Tail shorter than one chunk.
    if !ring.is_empty() {
        let n = ring.read(&mut chunk);
        let out = AudioFrame::new(
            chunk[..n].to_vec(),
            AudioFormat::TELEPHONY,
            forwarded,
            timestamp_ms,
        );
        forward_audio(stt, &out).await;
    }
    reason
}

async fn forward_audio(stt: &SttClient, frame: &AudioFrame) {
    match stt.send_audio(frame).await {
        Ok(()) => {}
        Err(VoiceError::NotActive) | Err(VoiceError::CircuitOpen(_)) => {
            // Reconnecting; audio is not buffered across sessions.
            metrics::record_dropped("stt_audio", 1);
            tracing::trace!(seq = frame.sequence, "recognizer not accepting audio");
        }
        Err(e) => {
            metrics::record_error("pipeline", "stt_send");
            tracing::warn!(error = %e, seq = frame.sequence, "failed to forward audio to recognizer");
        }
    }
}

async fn consume_transcripts(
    mut transcripts: broadcast::Receiver<SttEvent>,
    mut vad_events: mpsc::Receiver<VadEvent>,
    utterances: mpsc::Sender<Utterance>,
    cancel: CancelToken,
) {
    let mut segmenter = UtteranceSegmenter::new();
    let mut stt_open = true;
    let mut vad_open = true;

    while stt_open || vad_open {
        let ready = tokio::select! {
            _ = cancel.cancelled() => break,
            event = transcripts.recv(), if stt_open => match event {
                Ok(SttEvent::Transcript(result)) => segmenter.on_transcript(&result),
                Ok(SttEvent::Boundary(source)) => segmenter.on_boundary(source),
                Ok(SttEvent::SpeechStarted) => {
                    tracing::trace!("recognizer detected speech");
                    segmenter.on_speech_started();
                    None
                }
                Ok(SttEvent::Error(message)) => {
                    tracing::warn!(%message, "transcription lost for the rest of the call");
                    None
                }
                Err(RecvError::Lagged(missed)) => {
                    metrics::record_dropped("transcript", missed);
                    tracing::warn!(missed, "transcript consumer lagged");
                    None
                }
                Err(RecvError::Closed) => {
                    stt_open = false;
                    None
                }
            },
            event = vad_events.recv(), if vad_open => match event {
                Some(VadEvent::SpeechStarted) => {
                    segmenter.on_speech_started();
                    None
                }
                Some(VadEvent::Boundary) => segmenter.on_boundary(BoundarySource::Vad),
                None => {
                    vad_open = false;
                    None
                }
            },
        };

        let Some(utterance) = ready else { continue };
        tracing::info!(
            seq = utterance.seq,
            trigger = utterance.trigger.as_str(),
            chars = utterance.text.len(),
            "utterance complete"
        );
        match utterances.try_send(utterance) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                metrics::record_dropped("utterance", 1);
                tracing::warn!(seq = dropped.seq, "responder busy, dropping utterance");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
}

struct Responder {
    call_id: String,
    stream_id: String,
    orchestrator: Arc<OrchestratorClient>,
    tts: TtsClient,
    tracker: Arc<CallTracker>,
    fallback_message: String,
    frame_bytes: usize,
}

impl Responder {
    async fn run<K: MediaSink>(
        self,
        mut utterances: mpsc::Receiver<Utterance>,
        mut sink: K,
        cancel: CancelToken,
    ) {
        loop {
            let utterance = tokio::select! {
                _ = cancel.cancelled() => break,
                next = utterances.recv() => match next {
                    Some(utterance) => utterance,
                    None => break,
                },
            };
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.respond(&utterance, &mut sink) => result,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, seq = utterance.seq, "media connection lost during reply");
                break;
            }
        }
        self.tts.close();
    }

    async fn respond<K: MediaSink>(
        &self,
        utterance: &Utterance,
        sink: &mut K,
    ) -> Result<(), CallError> {
        self.tracker.add_utterance();
        let reply = self.reply_for(utterance).await;

        let mut audio = match self.tts.synthesize(&reply).await {
            Ok(audio) => audio,
            Err(e) => {
                metrics::record_error("pipeline", "synthesis");
                tracing::warn!(error = %e, seq = utterance.seq, "synthesis failed, reply not played");
                return Ok(());
            }
        };

        let mut sent = 0usize;
        while let Some(chunk) = audio.recv().await {
            for frame in chunk.data.chunks(self.frame_bytes) {
                sink.send(OutboundMessage::Media {
                    stream_id: self.stream_id.clone(),
                    payload: frame.to_vec(),
                })
                .await?;
                self.tracker.add_audio(Direction::Outbound, frame.len());
                sent += frame.len();
            }
        }
        sink.send(OutboundMessage::Mark {
            stream_id: self.stream_id.clone(),
            name: format!("utterance-{}", utterance.seq),
        })
        .await?;
        tracing::debug!(seq = utterance.seq, bytes = sent, "reply sent");
        Ok(())
    }

    /// The orchestrator's reply, or the fallback message if it has none.
    async fn reply_for(&self, utterance: &Utterance) -> String {
        let request = OrchestratorRequest {
            call_id: self.call_id.clone(),
            stream_id: self.stream_id.clone(),
            transcript: utterance.text.clone(),
            utterance_seq: utterance.seq,
        };
        match self.orchestrator.respond(&request).await {
            Ok(reply) => {
                if let Some(actions) = &reply.actions {
                    tracing::debug!(%actions, "orchestrator returned actions");
                }
                reply.reply
            }
            Err(e) => {
                self.tracker.add_fallback();
                tracing::warn!(error = %e, seq = utterance.seq, "orchestrator unavailable, using fallback reply");
                self.fallback_message.clone()
            }
        }
    }
}
