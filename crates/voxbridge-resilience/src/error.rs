use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    #[error("reconnect to {name} failed after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        name: String,
        attempts: u32,
        last_error: String,
    },

    #[error("reconnect to {name} cancelled after {attempts} attempts")]
    Cancelled { name: String, attempts: u32 },
}
