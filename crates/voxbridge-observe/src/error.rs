//! Error types for the observability layer.

/// Errors that can occur while wiring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// The Prometheus recorder could not be installed (usually because a
    /// recorder is already registered for this process).
    #[error("failed to install metrics recorder: {0}")]
    MetricsInstall(String),
}
