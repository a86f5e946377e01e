use std::collections::HashMap;
use std::sync::Arc;
use voxbridge_types::Dependency;

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::reconnect::ReconnectPolicy;

/// Process-wide registry of circuit breakers and the reconnect policy.
///
/// Constructed once at startup and handed to every client; each dependency
/// has exactly one breaker for the life of the process.
#[derive(Debug)]
pub struct ResilienceManager {
    breakers: HashMap<Dependency, Arc<CircuitBreaker>>,
    reconnect: ReconnectPolicy,
}

impl ResilienceManager {
    pub fn new(breaker_config: BreakerConfig, reconnect: ReconnectPolicy) -> Self {
        let breakers = Dependency::ALL
            .iter()
            .map(|dep| (*dep, Arc::new(CircuitBreaker::new(dep.as_str(), breaker_config))))
            .collect();
        Self { breakers, reconnect }
    }

    /// Replaces the breaker for one dependency with differently tuned thresholds.
    pub fn with_breaker_config(mut self, dependency: Dependency, config: BreakerConfig) -> Self {
        self.breakers.insert(
            dependency,
            Arc::new(CircuitBreaker::new(dependency.as_str(), config)),
        );
        self
    }

    pub fn breaker(&self, dependency: Dependency) -> Arc<CircuitBreaker> {
        match self.breakers.get(&dependency) {
            Some(breaker) => Arc::clone(breaker),
            // Unreachable with the constructor above, which registers every
            // dependency.
            None => Arc::new(CircuitBreaker::new(dependency.as_str(), BreakerConfig::default())),
        }
    }

    /// Snapshots of every breaker, in [`Dependency::ALL`] order.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        Dependency::ALL
            .iter()
            .filter_map(|dep| self.breakers.get(dep))
            .map(|breaker| breaker.snapshot())
            .collect()
    }

    pub fn reconnect_policy(&self) -> &ReconnectPolicy {
        &self.reconnect
    }
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new(BreakerConfig::default(), ReconnectPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use std::time::Duration;

    #[test]
    fn same_breaker_for_same_dependency() {
        let manager = ResilienceManager::default();
        let a = manager.breaker(Dependency::Tts);
        let b = manager.breaker(Dependency::Tts);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &manager.breaker(Dependency::Stt)));
    }

    #[test]
    fn failures_are_visible_across_handles() {
        let manager = ResilienceManager::new(
            BreakerConfig {
                max_failures: 1,
                reset_timeout: Duration::from_secs(30),
            },
            ReconnectPolicy::default(),
        );
        manager.breaker(Dependency::Orchestrator).record_result(false);

        let snaps = manager.snapshots();
        assert_eq!(snaps.len(), 3);
        assert_eq!(snaps[0].name, "stt");
        assert_eq!(snaps[2].name, "orchestrator");
        assert_eq!(snaps[2].state, BreakerState::Open);
        assert_eq!(snaps[0].state, BreakerState::Closed);
    }

    #[test]
    fn per_dependency_override() {
        let cfg = BreakerConfig {
            max_failures: 2,
            reset_timeout: Duration::from_secs(5),
        };
        let manager = ResilienceManager::default().with_breaker_config(Dependency::Stt, cfg);
        assert_eq!(manager.breaker(Dependency::Stt).config(), cfg);
        assert_eq!(
            manager.breaker(Dependency::Tts).config(),
            BreakerConfig::default()
        );
    }
}
