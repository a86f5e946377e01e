//! Exponential-backoff reconnect loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::ResilienceError;

/// Retry schedule for re-establishing a provider session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Total connect attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Growth factor between consecutive delays. Values below 1 are clamped.
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_backoff.as_secs_f64() * multiplier.powi(exponent);
        let cap = self.max_backoff.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Calls `connect` until it succeeds, the policy is exhausted or `cancel`
/// fires.
///
/// `connect` receives the 1-based attempt number. Cancellation is checked
/// before every attempt and raced against every backoff sleep; an attempt
/// already in flight is allowed to finish.
pub async fn reconnect<T, E, F, Fut>(
    name: &str,
    policy: &ReconnectPolicy,
    cancel: &CancelToken,
    mut connect: F,
) -> Result<T, ResilienceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.attempts();
    let mut attempted = 0;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(ResilienceError::Cancelled {
                name: name.to_string(),
                attempts: attempted,
            });
        }

        attempted = attempt;
        match connect(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(dependency = name, attempt, "reconnected");
                }
                return Ok(value);
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(
                    dependency = name,
                    attempt,
                    max_attempts,
                    error = %last_error,
                    "connect attempt failed"
                );
            }
        }

        if attempt == max_attempts {
            break;
        }

        let delay = policy.backoff_for(attempt);
        tracing::debug!(dependency = name, delay_ms = delay.as_millis() as u64, "backing off");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                tracing::debug!(dependency = name, attempt, "reconnect cancelled during backoff");
                return Err(ResilienceError::Cancelled {
                    name: name.to_string(),
                    attempts: attempted,
                });
            }
        }
    }

    tracing::error!(
        dependency = name,
        attempts = max_attempts,
        error = %last_error,
        "reconnect attempts exhausted"
    );
    Err(ResilienceError::ReconnectExhausted {
        name: name.to_string(),
        attempts: max_attempts,
        last_error,
    })
}
