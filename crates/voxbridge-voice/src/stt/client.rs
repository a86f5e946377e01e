//! Per-call STT session supervisor.
//!
//! Lifecycle: `Idle -> Starting -> Active -> (Reconnecting -> Active | Stopped) -> Closed`.
//!
//! A transport failure (failed send, provider error frame or an unexpected end
//! of the provider stream) moves an active session to `Reconnecting` and
//! spawns a reconnect task. Audio sent meanwhile is rejected, not buffered.
//! Each installed session carries a generation number so that a stale reader
//! or a late send failure cannot tear down its replacement.

use futures_util::stream::{BoxStream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;
use voxbridge_observe::{correlation, metrics};
use voxbridge_resilience::{
    reconnect, BreakerError, CancelToken, CircuitBreaker, ReconnectPolicy, ResilienceError,
    ResilienceManager,
};
use voxbridge_types::{AudioFrame, BoundarySource, Dependency};

use super::messages::ProviderMessage;
use super::{AudioSink, ProviderSession, SpeechProvider, SttEvent, SttSessionOptions};
use crate::config::SttConfig;
use crate::error::{outcome_of, VoiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttState {
    Idle,
    Starting,
    Active,
    Reconnecting,
    Stopped,
    Closed,
}

struct StateCell {
    state: SttState,
    generation: u64,
    /// Cancels reconnects of the current session; replaced on each `start`.
    session_cancel: CancelToken,
    /// Cancels the reader of the installed generation.
    reader_cancel: CancelToken,
}

struct Inner {
    provider: Arc<dyn SpeechProvider>,
    options: SttSessionOptions,
    breaker: Arc<CircuitBreaker>,
    policy: ReconnectPolicy,
    capacity: usize,
    drain_delay: Duration,
    /// Child of the call token; cancelled by `close`.
    root_cancel: CancelToken,
    cell: Mutex<StateCell>,
    sink: tokio::sync::Mutex<Option<Box<dyn AudioSink>>>,
    events: Mutex<Option<broadcast::Sender<SttEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Streaming speech-to-text client for one call.
pub struct SttClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SttClient")
            .field("state", &self.state())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl SttClient {
    pub fn new(
        provider: Arc<dyn SpeechProvider>,
        config: &SttConfig,
        resilience: &ResilienceManager,
        call_cancel: &CancelToken,
    ) -> Self {
        let capacity = config.transcript_capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        let root_cancel = call_cancel.child();
        Self {
            inner: Arc::new(Inner {
                provider,
                options: SttSessionOptions::from(config),
                breaker: resilience.breaker(Dependency::Stt),
                policy: *resilience.reconnect_policy(),
                capacity,
                drain_delay: config.close_drain(),
                cell: Mutex::new(StateCell {
                    state: SttState::Idle,
                    generation: 0,
                    session_cancel: root_cancel.child(),
                    reader_cancel: root_cancel.child(),
                }),
                root_cancel,
                sink: tokio::sync::Mutex::new(None),
                events: Mutex::new(Some(tx)),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> SttState {
        self.inner.lock_cell().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SttState::Active
    }

    /// Subscribes to transcript events. Fails once the client is closed.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<SttEvent>, VoiceError> {
        match self.inner.lock_events().as_ref() {
            Some(tx) => Ok(tx.subscribe()),
            None => Err(VoiceError::Closed),
        }
    }

    /// Opens the provider session, retrying per the reconnect policy.
    ///
    /// Exhausting the retries is a setup failure the caller should treat as
    /// fatal.
    pub async fn start(&self) -> Result<(), VoiceError> {
        let cancel = {
            let mut cell = self.inner.lock_cell();
            match cell.state {
                SttState::Starting | SttState::Active | SttState::Reconnecting => {
                    return Err(VoiceError::AlreadyActive)
                }
                SttState::Closed => return Err(VoiceError::Closed),
                SttState::Idle | SttState::Stopped => {}
            }
            cell.state = SttState::Starting;
            cell.session_cancel = self.inner.root_cancel.child();
            cell.session_cancel.clone()
        };

        tracing::info!(model = %self.inner.options.model, "starting stt session");
        match self.inner.connect_with_retry(&cancel).await {
            Ok(session) => {
                if self.inner.install(session, SttState::Starting).await {
                    tracing::info!("stt session active");
                    Ok(())
                } else {
                    Err(self.not_running_error())
                }
            }
            Err(e) => {
                {
                    let mut cell = self.inner.lock_cell();
                    if cell.state == SttState::Starting {
                        cell.state = SttState::Stopped;
                    }
                }
                metrics::record_error("stt", "setup");
                tracing::error!(error = %e, "stt session could not be established");
                Err(VoiceError::Reconnect(e))
            }
        }
    }

    /// Forwards one frame to the provider through the STT circuit breaker.
    ///
    /// A transport failure schedules a reconnect and is returned to the
    /// caller; the frame is not retried.
    pub async fn send_audio(&self, frame: &AudioFrame) -> Result<(), VoiceError> {
        let generation = {
            let cell = self.inner.lock_cell();
            match cell.state {
                SttState::Active => cell.generation,
                SttState::Closed => return Err(VoiceError::Closed),
                _ => return Err(VoiceError::NotActive),
            }
        };

        let mut guard = self.inner.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(VoiceError::NotActive);
        };
        let started = Instant::now();
        let result = self
            .inner
            .breaker
            .call(|| sink.send(frame.data.clone()))
            .await;
        drop(guard);

        metrics::record_dependency_request(Dependency::Stt, outcome_of(&result), started.elapsed());
        match result {
            Ok(()) => Ok(()),
            Err(BreakerError::Open { name }) => Err(VoiceError::CircuitOpen(name)),
            Err(BreakerError::Inner(e)) => {
                self.inner.on_transport_failure(generation, &e.to_string());
                Err(e)
            }
        }
    }

    /// Ends the provider session. Idempotent.
    ///
    /// Pending reconnects are cancelled. The provider is asked to flush, and
    /// results it still sends are published until [`close`](Self::close).
    pub async fn stop(&self) {
        let cancel = {
            let mut cell = self.inner.lock_cell();
            match cell.state {
                SttState::Idle | SttState::Stopped | SttState::Closed => return,
                _ => {}
            }
            cell.state = SttState::Stopped;
            cell.session_cancel.clone()
        };
        cancel.cancel();

        let sink = self.inner.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.finish().await {
                tracing::debug!(error = %e, "stt finish failed");
            }
        }
        tracing::info!("stt session stopped");
    }

    /// Stops the session, waits for supervised tasks and closes the
    /// transcript channel after the drain delay.
    pub async fn close(&self) {
        if self.state() == SttState::Closed {
            return;
        }
        self.stop().await;
        self.inner.lock_cell().state = SttState::Closed;

        tokio::time::sleep(self.inner.drain_delay).await;
        self.inner.root_cancel.cancel();

        loop {
            let handles: Vec<_> = std::mem::take(&mut *self.inner.lock_tasks());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }

        self.inner.lock_events().take();
        tracing::debug!("stt client closed");
    }

    fn not_running_error(&self) -> VoiceError {
        match self.state() {
            SttState::Closed => VoiceError::Closed,
            _ => VoiceError::NotActive,
        }
    }
}

impl Inner {
    fn lock_cell(&self) -> MutexGuard<'_, StateCell> {
        self.cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_events(&self) -> MutexGuard<'_, Option<broadcast::Sender<SttEvent>>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        let cell = self.lock_cell();
        cell.state == SttState::Active && cell.generation == generation
    }

    async fn connect_with_retry(
        &self,
        cancel: &CancelToken,
    ) -> Result<ProviderSession, ResilienceError> {
        let provider = &self.provider;
        let breaker = &self.breaker;
        let options = &self.options;
        reconnect(Dependency::Stt.as_str(), &self.policy, cancel, |attempt| async move {
            tracing::debug!(attempt, "opening stt provider session");
            let started = Instant::now();
            let result = breaker
                .call(|| provider.connect(options))
                .instrument(correlation::dependency_span(Dependency::Stt))
                .await;
            metrics::record_dependency_request(
                Dependency::Stt,
                outcome_of(&result),
                started.elapsed(),
            );
            result
        })
        .await
    }

    /// Installs `session` if the client is still in `expected` state.
    async fn install(self: &Arc<Self>, session: ProviderSession, expected: SttState) -> bool {
        let mut sink = self.sink.lock().await;
        let (generation, reader_cancel) = {
            let mut cell = self.lock_cell();
            if cell.state != expected {
                return false;
            }
            cell.state = SttState::Active;
            cell.generation += 1;
            cell.reader_cancel.cancel();
            cell.reader_cancel = self.root_cancel.child();
            (cell.generation, cell.reader_cancel.clone())
        };
        *sink = Some(session.sink);
        drop(sink);

        self.spawn_reader(generation, reader_cancel, session.messages);
        true
    }

    fn spawn_reader(
        self: &Arc<Self>,
        generation: u64,
        cancel: CancelToken,
        messages: BoxStream<'static, Result<String, VoiceError>>,
    ) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(
            async move { inner.read_loop(generation, cancel, messages).await }
                .instrument(tracing::Span::current()),
        );
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.lock_tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    async fn read_loop(
        self: Arc<Self>,
        generation: u64,
        cancel: CancelToken,
        mut messages: BoxStream<'static, Result<String, VoiceError>>,
    ) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = messages.next() => next,
            };
            match next {
                Some(Ok(text)) => self.handle_message(&text),
                Some(Err(e)) => {
                    self.on_transport_failure(generation, &e.to_string());
                    return;
                }
                None => {
                    if self.is_current(generation) {
                        self.on_transport_failure(generation, "provider stream ended");
                    }
                    return;
                }
            }
        }
    }

    fn handle_message(&self, text: &str) {
        match ProviderMessage::parse(text) {
            Err(e) => {
                metrics::record_error("stt", "malformed_message");
                tracing::warn!(error = %e, "ignoring malformed stt message");
            }
            Ok(ProviderMessage::Metadata { request_id }) => {
                tracing::debug!(request_id = ?request_id, "stt session metadata");
            }
            Ok(ProviderMessage::SpeechStarted { timestamp }) => {
                tracing::debug!(timestamp, "provider detected speech");
                self.publish(SttEvent::SpeechStarted);
            }
            Ok(ProviderMessage::UtteranceEnd { last_word_end }) => {
                tracing::debug!(last_word_end, "provider utterance end");
                self.publish(SttEvent::Boundary(BoundarySource::Provider));
            }
            Ok(ProviderMessage::Results(results)) => {
                if let Some(transcript) = results.into_transcription() {
                    self.publish(SttEvent::Transcript(transcript));
                }
            }
            Ok(ProviderMessage::Unknown) => {
                tracing::debug!("ignoring unrecognised stt message");
            }
        }
    }

    /// Publishes without blocking. A lagging subscriber loses the oldest
    /// pending events.
    fn publish(&self, event: SttEvent) {
        let events = self.lock_events();
        let Some(tx) = events.as_ref() else {
            return;
        };
        if tx.len() >= self.capacity {
            metrics::record_dropped("transcript", 1);
            tracing::warn!(
                capacity = self.capacity,
                "transcript channel full, dropping oldest event"
            );
        }
        // Fails only when nobody is subscribed.
        let _ = tx.send(event);
    }

    fn on_transport_failure(self: &Arc<Self>, generation: u64, reason: &str) {
        let cancel = {
            let mut cell = self.lock_cell();
            if cell.state != SttState::Active || cell.generation != generation {
                return;
            }
            cell.state = SttState::Reconnecting;
            cell.reader_cancel.cancel();
            cell.session_cancel.clone()
        };
        metrics::record_error("stt", "transport");
        tracing::warn!(reason, "stt transport failure, reconnecting");

        let inner = Arc::clone(self);
        let handle = tokio::spawn(
            async move {
                inner.sink.lock().await.take();
                match inner.connect_with_retry(&cancel).await {
                    Ok(session) => {
                        if inner.install(session, SttState::Reconnecting).await {
                            tracing::info!("stt session re-established");
                        }
                    }
                    Err(ResilienceError::Cancelled { .. }) => {
                        tracing::debug!("stt reconnect cancelled");
                    }
                    Err(e) => {
                        {
                            let mut cell = inner.lock_cell();
                            if cell.state == SttState::Reconnecting {
                                cell.state = SttState::Stopped;
                            }
                        }
                        tracing::error!(error = %e, "stt reconnect failed, continuing without transcription");
                        inner.publish(SttEvent::Error(e.to_string()));
                    }
                }
            }
            .instrument(tracing::Span::current()),
        );
        self.track(handle);
    }
}
