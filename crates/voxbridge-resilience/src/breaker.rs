//! Circuit breaker.
//!
//! State machine:
//!
//! - **closed**: operations run; consecutive failures are counted and a
//!   success resets the count. Reaching `max_failures` opens the breaker.
//! - **open**: operations fail fast without running until `reset_timeout`
//!   has elapsed since the breaker opened, then the breaker is half-open.
//! - **half-open**: exactly one trial operation is admitted. Success closes
//!   the breaker and clears the failure count; failure reopens it and
//!   restarts the timer.
//!
//! State lives behind a `std::sync::Mutex`: every acquisition is a short
//! bookkeeping update that never spans an `.await`, and readiness probes read
//! it concurrently with in-flight calls.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use voxbridge_observe::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Numeric value exported on the state gauge.
    fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed breaker. Zero is treated as one.
    pub max_failures: u32,
    /// Time an open breaker waits before admitting a trial call.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of a breaker, used by readiness reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    /// Milliseconds since the most recent recorded failure, if any.
    pub last_failure_ago_ms: Option<u64>,
    pub reset_timeout_ms: u64,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without running the operation.
    Open { name: String },
    /// The operation ran and failed.
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { name } => write!(f, "circuit breaker for {} is open", name),
            Self::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Admission granted by [`CircuitBreaker::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Permit {
    trial: bool,
}

/// A circuit breaker guarding one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Current state, after applying any elapsed reset timeout.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Asks whether an operation may run now.
    ///
    /// For call sites that drive a provider directly instead of through
    /// [`call`](Self::call). In the half-open state this claims the single
    /// trial slot, so every `true` must be followed by
    /// [`record_result`](Self::record_result).
    pub fn allow(&self) -> bool {
        self.acquire().is_some()
    }

    /// Records the outcome of an operation admitted by [`allow`](Self::allow).
    pub fn record_result(&self, success: bool) {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.trial_in_flight = false;

        if success {
            match inner.state {
                BreakerState::HalfOpen => {
                    inner.failure_count = 0;
                    inner.opened_at = None;
                    self.transition(&mut inner, BreakerState::Closed);
                }
                BreakerState::Closed => inner.failure_count = 0,
                // A call admitted before the breaker opened finished late; the
                // open timer keeps running.
                BreakerState::Open => {}
            }
            return;
        }

        let now = Instant::now();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);
        metrics::record_breaker_failure(&self.name);

        match inner.state {
            BreakerState::Closed => {
                if inner.failure_count >= self.config.max_failures.max(1) {
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                inner.opened_at = Some(now);
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    /// Runs `op` if the breaker admits it and records the outcome.
    ///
    /// Returns [`BreakerError::Open`] without invoking `op` while the breaker
    /// is open (or while another half-open trial is in flight).
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.acquire() {
            Some(permit) => permit,
            None => {
                tracing::debug!(dependency = %self.name, "circuit open, failing fast");
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: permit.trial,
        };
        let result = op().await;
        guard.armed = false;

        self.record_result(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_ago_ms: inner
                .last_failure_at
                .map(|at| at.elapsed().as_millis() as u64),
            reset_timeout_ms: self.config.reset_timeout.as_millis() as u64,
        }
    }

    fn acquire(&self) -> Option<Permit> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => Some(Permit { trial: false }),
            BreakerState::Open => None,
            BreakerState::HalfOpen if inner.trial_in_flight => None,
            BreakerState::HalfOpen => {
                inner.trial_in_flight = true;
                Some(Permit { trial: true })
            }
        }
    }

    fn release_trial(&self) {
        self.lock().trial_in_flight = false;
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
        if elapsed >= self.config.reset_timeout {
            inner.trial_in_flight = false;
            self.transition(inner, BreakerState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        metrics::record_breaker_transition(&self.name, from.as_str(), to.as_str(), to.gauge_value());

        match to {
            BreakerState::Open => tracing::warn!(
                dependency = %self.name,
                from = from.as_str(),
                failures = inner.failure_count,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "circuit breaker opened"
            ),
            _ => tracing::info!(
                dependency = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "circuit breaker state changed"
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A panic while holding the lock leaves at worst a stale
                // counter; refusing every call would turn that into an outage.
                tracing::error!(dependency = %self.name, "circuit breaker lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Releases a half-open trial slot if the trial future is dropped before it
/// reports an outcome.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial();
        }
    }
}
