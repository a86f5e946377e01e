use thiserror::Error;
use voxbridge_observe::metrics::Outcome;
use voxbridge_resilience::{BreakerError, ResilienceError};

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("session is already active")]
    AlreadyActive,

    #[error("session is not active")]
    NotActive,

    #[error("client is closed")]
    Closed,

    #[error("circuit breaker for {0} is open")]
    CircuitOpen(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Reconnect(#[from] ResilienceError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("text to synthesize is empty")]
    EmptyText,

    #[error("text exceeds maximum size: {len} bytes (limit: {limit} bytes)")]
    TextTooLong { len: usize, limit: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<BreakerError<VoiceError>> for VoiceError {
    fn from(err: BreakerError<VoiceError>) -> Self {
        match err {
            BreakerError::Open { name } => Self::CircuitOpen(name),
            BreakerError::Inner(e) => e,
        }
    }
}

/// Metric outcome of a breaker-guarded provider call.
pub(crate) fn outcome_of<T>(result: &Result<T, BreakerError<VoiceError>>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(BreakerError::Open { .. }) => Outcome::Rejected,
        Err(BreakerError::Inner(VoiceError::Timeout(_))) => Outcome::Timeout,
        Err(BreakerError::Inner(_)) => Outcome::Failure,
    }
}
