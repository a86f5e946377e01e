//! Observability layer for the voxbridge voice bridge.
//!
//! Three concerns live here so that every other crate can instrument itself
//! without knowing how the process exports telemetry:
//!
//! | Concern | Module |
//! |---------|--------|
//! | Prometheus-style counters, gauges and histograms | [`metrics`] |
//! | Per-call correlation spans for structured logs | [`correlation`] |
//! | Readiness-probe aggregation across dependencies | [`readiness`] |
//!
//! Metric recording goes through the `metrics` facade. When no recorder is
//! installed (unit tests, library consumers) the calls are no-ops.
//!
//! # Usage
//!
//! ```rust,ignore
//! use voxbridge_observe::{metrics, correlation};
//!
//! let span = correlation::call_span(&call_id, &stream_id);
//! metrics::record_call_started();
//! ```

pub mod correlation;
mod error;
pub mod metrics;
pub mod readiness;

pub use error::ObserveError;
pub use readiness::{CheckResult, ReadinessReport};
