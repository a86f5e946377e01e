//! In-process stand-ins for the three providers and the media connection.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use voxbridge_server::call::CallError;
use voxbridge_server::config::Config;
use voxbridge_server::media::{MediaEvent, MediaSink, MediaSource, OutboundMessage, StreamStart};
use voxbridge_server::AppState;
use voxbridge_types::{AudioFormat, AudioFrame};
use voxbridge_voice::{
    AudioSink, ConversationBackend, OrchestratorReply, OrchestratorRequest, ProviderSession,
    SpeechProvider, SpeechSynthesizer, SttSessionOptions, SynthesisRequest, VoiceError,
};

type MessageTx = mpsc::UnboundedSender<Result<String, VoiceError>>;

/// Recognizer whose sessions are driven by the test.
#[derive(Default)]
pub struct MockSpeech {
    pub failing_connects: AtomicU32,
    pub connects: AtomicU32,
    pub audio: Arc<Mutex<Vec<Vec<u8>>>>,
    sessions: Mutex<Vec<MessageTx>>,
}

impl MockSpeech {
    pub fn failing() -> Self {
        Self {
            failing_connects: AtomicU32::new(u32::MAX),
            ..Self::default()
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn push(&self, raw: &str) {
        let tx = self.sessions.lock().unwrap().last().cloned().unwrap();
        tx.send(Ok(raw.to_string())).unwrap();
    }

    pub fn push_final(&self, text: &str) {
        self.push(&results(text, true));
    }

    pub async fn wait_for_session(&self) {
        for _ in 0..200 {
            if self.session_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("recognizer session never opened");
    }
}

pub fn results(text: &str, is_final: bool) -> String {
    serde_json::json!({
        "type": "Results",
        "is_final": is_final,
        "speech_final": is_final,
        "start": 0.0,
        "duration": 1.2,
        "channel": {"alternatives": [{"transcript": text, "confidence": 0.93}]}
    })
    .to_string()
}

struct MockAudioSink {
    audio: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl AudioSink for MockAudioSink {
    async fn send(&mut self, audio: Vec<u8>) -> Result<(), VoiceError> {
        self.audio.lock().unwrap().push(audio);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        Ok(())
    }
}

#[async_trait]
impl SpeechProvider for MockSpeech {
    async fn connect(&self, _options: &SttSessionOptions) -> Result<ProviderSession, VoiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(VoiceError::Transport("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().push(tx);
        let messages = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        Ok(ProviderSession {
            sink: Box::new(MockAudioSink {
                audio: Arc::clone(&self.audio),
            }),
            messages,
        })
    }
}

/// Synthesizer returning `samples` of 24 kHz silence and recording the text.
pub struct MockSynth {
    pub samples: usize,
    pub texts: Mutex<Vec<String>>,
}

impl MockSynth {
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynth {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, VoiceError> {
        self.texts.lock().unwrap().push(request.text.clone());
        Ok(vec![0u8; self.samples * 2])
    }
}

/// Orchestrator answering every turn with a fixed reply, or failing.
pub struct MockBackend {
    pub reply: Option<String>,
    pub requests: Mutex<Vec<OrchestratorRequest>>,
}

impl MockBackend {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<OrchestratorRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationBackend for MockBackend {
    async fn respond(&self, request: &OrchestratorRequest) -> Result<OrchestratorReply, VoiceError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.reply {
            Some(reply) => Ok(OrchestratorReply {
                reply: reply.clone(),
                actions: None,
            }),
            None => Err(VoiceError::Provider {
                status: 503,
                body: "overloaded".to_string(),
            }),
        }
    }

    async fn health(&self) -> Result<(), VoiceError> {
        match &self.reply {
            Some(_) => Ok(()),
            None => Err(VoiceError::Transport("connection refused".to_string())),
        }
    }
}

/// Fast settings: short backoff, a three-frame silence boundary.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.stt.api_key = "stt-key".to_string();
    config.stt.close_drain_ms = 10;
    config.tts.api_key = "tts-key".to_string();
    config.resilience.reconnect_attempts = 2;
    config.resilience.initial_backoff_ms = 10;
    config.resilience.max_backoff_ms = 20;
    config.pipeline.vad.silence_frames = 3;
    config
}

pub fn state(
    config: Config,
    speech: &Arc<MockSpeech>,
    synth: &Arc<MockSynth>,
    backend: &Arc<MockBackend>,
) -> Arc<AppState> {
    Arc::new(AppState::new(
        config,
        Arc::clone(speech) as Arc<dyn SpeechProvider>,
        Arc::clone(synth) as Arc<dyn SpeechSynthesizer>,
        Arc::clone(backend) as Arc<dyn ConversationBackend>,
    ))
}

pub struct ChannelSource(pub mpsc::UnboundedReceiver<MediaEvent>);

#[async_trait]
impl MediaSource for ChannelSource {
    async fn next_event(&mut self) -> Option<MediaEvent> {
        self.0.recv().await
    }
}

pub struct ChannelSink(pub mpsc::UnboundedSender<OutboundMessage>);

#[async_trait]
impl MediaSink for ChannelSink {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), CallError> {
        self.0
            .send(message)
            .map_err(|_| CallError::Media("connection closed".to_string()))
    }
}

pub fn start_event(stream_id: &str) -> MediaEvent {
    MediaEvent::Start(StreamStart {
        stream_id: stream_id.to_string(),
        call_id: Some("CA-test".to_string()),
        format: AudioFormat::TELEPHONY,
    })
}

/// 20 ms of full-scale mu-law, well above the speech threshold.
pub fn loud_frame(seq: u64) -> MediaEvent {
    MediaEvent::Media(AudioFrame::new(
        vec![0x00; 160],
        AudioFormat::TELEPHONY,
        seq,
        seq * 20,
    ))
}

/// 20 ms of mu-law digital silence.
pub fn silent_frame(seq: u64) -> MediaEvent {
    MediaEvent::Media(AudioFrame::new(
        vec![0xFF; 160],
        AudioFormat::TELEPHONY,
        seq,
        seq * 20,
    ))
}
