//! Readiness aggregation.
//!
//! A readiness report is the AND of its component checks. Each check carries
//! a status, a human-readable message and how long it took, so an operator
//! looking at a failed probe can tell a slow dependency from a dead one.

use serde::Serialize;
use std::future::Future;
use std::time::Instant;

/// Outcome of a single readiness check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub healthy: bool,
    pub message: String,
    pub latency_ms: u64,
}

impl CheckResult {
    pub fn healthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            message: message.into(),
            latency_ms: 0,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            message: message.into(),
            latency_ms: 0,
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// Aggregated readiness of the process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub checks: Vec<CheckResult>,
}

impl ReadinessReport {
    /// Builds a report; the process is ready only if every check passed.
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let ready = checks.iter().all(|c| c.healthy);
        Self { ready, checks }
    }
}

/// Runs a fallible check and records its latency.
///
/// `Ok(message)` becomes a healthy result; `Err(message)` an unhealthy one.
pub async fn timed_check<F>(name: &str, check: F) -> CheckResult
where
    F: Future<Output = Result<String, String>>,
{
    let started = Instant::now();
    let outcome = check.await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(message) => CheckResult::healthy(name, message),
        Err(message) => {
            tracing::warn!(check = name, %message, "readiness check failed");
            CheckResult::unhealthy(name, message)
        }
    };
    result.with_latency_ms(latency_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_and_of_checks() {
        let all_ok = ReadinessReport::from_checks(vec![
            CheckResult::healthy("stt", "configured"),
            CheckResult::healthy("tts", "configured"),
        ]);
        assert!(all_ok.ready);

        let one_bad = ReadinessReport::from_checks(vec![
            CheckResult::healthy("stt", "configured"),
            CheckResult::unhealthy("orchestrator", "connection refused"),
        ]);
        assert!(!one_bad.ready);
    }

    #[test]
    fn empty_report_is_ready() {
        assert!(ReadinessReport::from_checks(Vec::new()).ready);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_check_measures_latency() {
        let result = timed_check("orchestrator", async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Err("timed out".to_string())
        })
        .await;

        assert!(!result.healthy);
        assert_eq!(result.message, "timed out");
        assert_eq!(result.name, "orchestrator");
    }

    #[test]
    fn report_serializes_checks() {
        let report = ReadinessReport::from_checks(vec![
            CheckResult::healthy("tts", "configured").with_latency_ms(3)
        ]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ready"], true);
        assert_eq!(json["checks"][0]["name"], "tts");
        assert_eq!(json["checks"][0]["latency_ms"], 3);
    }
}
