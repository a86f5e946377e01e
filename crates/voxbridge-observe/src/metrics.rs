//! Metric names and recording helpers.
//!
//! All metrics are prefixed `voxbridge_`. Label values are drawn from small
//! fixed sets (dependency, outcome, component) so cardinality stays bounded;
//! call ids are never used as labels.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use voxbridge_types::Dependency;

use crate::error::ObserveError;

pub const ACTIVE_CALLS: &str = "voxbridge_active_calls";
pub const CALLS_TOTAL: &str = "voxbridge_calls_total";
pub const CALL_DURATION: &str = "voxbridge_call_duration_seconds";
pub const DEPENDENCY_REQUESTS: &str = "voxbridge_dependency_requests_total";
pub const DEPENDENCY_LATENCY: &str = "voxbridge_dependency_latency_seconds";
pub const ERRORS: &str = "voxbridge_errors_total";
pub const BREAKER_STATE: &str = "voxbridge_circuit_breaker_state";
pub const BREAKER_TRANSITIONS: &str = "voxbridge_circuit_breaker_transitions_total";
pub const BREAKER_FAILURES: &str = "voxbridge_circuit_breaker_failures_total";
pub const AUDIO_BYTES: &str = "voxbridge_audio_bytes_total";
pub const DROPPED: &str = "voxbridge_dropped_total";

/// Result class of a dependency request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    /// Short-circuited by an open breaker without reaching the provider.
    Rejected,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
        }
    }
}

/// Direction of audio relative to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Installs the Prometheus recorder for this process.
///
/// Must be called once at startup before any metric is recorded; calls made
/// before installation are silently discarded.
pub fn install_recorder() -> Result<PrometheusHandle, ObserveError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ObserveError::MetricsInstall(e.to_string()))?;
    describe_all();
    Ok(handle)
}

fn describe_all() {
    describe_gauge!(ACTIVE_CALLS, "Calls currently bridged");
    describe_counter!(CALLS_TOTAL, "Calls finished, by end reason");
    describe_histogram!(CALL_DURATION, "Wall-clock duration of finished calls");
    describe_counter!(DEPENDENCY_REQUESTS, "Requests to downstream dependencies, by outcome");
    describe_histogram!(DEPENDENCY_LATENCY, "Latency of downstream dependency requests");
    describe_counter!(ERRORS, "Errors, by component and kind");
    describe_gauge!(BREAKER_STATE, "Circuit breaker state (0 closed, 1 half-open, 2 open)");
    describe_counter!(BREAKER_TRANSITIONS, "Circuit breaker state transitions");
    describe_counter!(BREAKER_FAILURES, "Failures recorded by circuit breakers");
    describe_counter!(AUDIO_BYTES, "Audio bytes relayed, by direction");
    describe_counter!(DROPPED, "Items dropped under backpressure, by kind");
}

pub fn record_dependency_request(dependency: Dependency, outcome: Outcome, latency: Duration) {
    counter!(
        DEPENDENCY_REQUESTS,
        "dependency" => dependency.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        DEPENDENCY_LATENCY,
        "dependency" => dependency.as_str(),
        "outcome" => outcome.as_str()
    )
    .record(latency.as_secs_f64());
}

pub fn record_error(component: &'static str, kind: &'static str) {
    counter!(ERRORS, "component" => component, "kind" => kind).increment(1);
}

pub fn record_breaker_transition(name: &str, from: &'static str, to: &'static str, code: f64) {
    gauge!(BREAKER_STATE, "dependency" => name.to_string()).set(code);
    counter!(
        BREAKER_TRANSITIONS,
        "dependency" => name.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_failure(name: &str) {
    counter!(BREAKER_FAILURES, "dependency" => name.to_string()).increment(1);
}

pub fn record_audio_bytes(direction: Direction, bytes: usize) {
    counter!(AUDIO_BYTES, "direction" => direction.as_str()).increment(bytes as u64);
}

pub fn record_dropped(kind: &'static str, count: u64) {
    counter!(DROPPED, "kind" => kind).increment(count);
}

/// Per-call metrics tracker.
///
/// Creating a tracker bumps the active-call gauge; [`CallTracker::finish`]
/// (or dropping the tracker) records the duration and decrements it again,
/// exactly once.
#[derive(Debug)]
pub struct CallTracker {
    started: Instant,
    inbound_bytes: AtomicU64,
    outbound_bytes: AtomicU64,
    utterances: AtomicU64,
    fallbacks: AtomicU64,
    finished: bool,
}

/// Totals collected by a [`CallTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallStats {
    pub duration: Duration,
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
    pub utterances: u64,
    pub fallbacks: u64,
}

impl CallTracker {
    pub fn start() -> Self {
        gauge!(ACTIVE_CALLS).increment(1.0);
        Self {
            started: Instant::now(),
            inbound_bytes: AtomicU64::new(0),
            outbound_bytes: AtomicU64::new(0),
            utterances: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            finished: false,
        }
    }

    pub fn add_audio(&self, direction: Direction, bytes: usize) {
        let counter = match direction {
            Direction::Inbound => &self.inbound_bytes,
            Direction::Outbound => &self.outbound_bytes,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
        record_audio_bytes(direction, bytes);
    }

    pub fn add_utterance(&self) {
        self.utterances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CallStats {
        CallStats {
            duration: self.started.elapsed(),
            inbound_bytes: self.inbound_bytes.load(Ordering::Relaxed),
            outbound_bytes: self.outbound_bytes.load(Ordering::Relaxed),
            utterances: self.utterances.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Records call-end metrics and returns the final totals.
    pub fn finish(mut self, reason: &'static str) -> CallStats {
        self.record_end(reason)
    }

    fn record_end(&mut self, reason: &'static str) -> CallStats {
        let stats = self.stats();
        if !self.finished {
            self.finished = true;
            gauge!(ACTIVE_CALLS).decrement(1.0);
            counter!(CALLS_TOTAL, "reason" => reason).increment(1);
            histogram!(CALL_DURATION).record(stats.duration.as_secs_f64());
        }
        stats
    }
}

impl Drop for CallTracker {
    fn drop(&mut self) {
        self.record_end("dropped");
    }
}
