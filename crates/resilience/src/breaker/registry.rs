//! Registry mapping dependency names to shared circuit breakers
//!
//! The registry is the single authority for breaker instances: two call sites
//! asking for the same name get the same `Arc`, so failure counts and state
//! are never split across duplicate breakers. It holds no global state; share
//! it by cloning the `Arc` that owns it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
use crate::error::ConfigResult;
use crate::time::{Clock, SystemClock};

/// Aggregate health of all registered breakers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No circuit is open
    Healthy,
    /// At least one circuit is open
    Degraded,
}

/// Health report across every breaker in the registry
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Names of dependencies whose circuit is currently open
    pub open_circuits: Vec<String>,
    /// Number of breakers in the registry
    pub total_circuits: usize,
    /// Snapshot of every breaker, keyed by dependency name
    pub circuits: HashMap<String, CircuitBreakerSnapshot>,
}

/// Shared registry of circuit breakers, one per dependency name.
///
/// Lookup and creation happen under a single registry lock; breaker
/// operations themselves only take the individual breaker's lock.
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker<C>>>>,
    clock: C,
}

impl CircuitBreakerRegistry<SystemClock> {
    /// Create an empty registry using the system clock
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for CircuitBreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    /// Create an empty registry with a custom clock.
    ///
    /// Breakers created lazily by this registry share the clock.
    pub fn with_clock(clock: C) -> Self {
        Self { breakers: Mutex::new(HashMap::new()), clock }
    }

    /// Get the breaker for a dependency, creating it with the default
    /// configuration on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker<C>> {
        let mut breakers = self.breakers.lock();
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }

        debug!(breaker = name, "Creating circuit breaker with default config");
        let breaker = Arc::new(Self::build(name, CircuitBreakerConfig::default(), &self.clock));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Get the breaker for a dependency, creating it with the given
    /// configuration on first use.
    ///
    /// If the breaker already exists the configuration is ignored; the first
    /// creation wins.
    pub fn get_with_config(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Arc<CircuitBreaker<C>>> {
        let mut breakers = self.breakers.lock();
        if let Some(breaker) = breakers.get(name) {
            return Ok(Arc::clone(breaker));
        }

        config.validate()?;
        debug!(breaker = name, "Creating circuit breaker with custom config");
        let breaker = Arc::new(Self::build(name, config, &self.clock));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        Ok(breaker)
    }

    /// Remove a breaker from the registry.
    ///
    /// Existing `Arc` holders keep their instance; later `get` calls for the
    /// same name create a fresh breaker. Returns whether a breaker was removed.
    pub fn remove(&self, name: &str) -> bool {
        self.breakers.lock().remove(name).is_some()
    }

    /// Reset every breaker to its initial closed state
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.lock().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Snapshot every breaker, keyed by dependency name
    pub fn all_snapshots(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        let breakers: Vec<_> = self.breakers.lock().values().cloned().collect();
        breakers.into_iter().map(|b| (b.name().to_string(), b.snapshot())).collect()
    }

    /// Aggregate health across every breaker.
    ///
    /// `Degraded` as soon as any circuit is open; half-open circuits still
    /// count as healthy since they are admitting probes.
    pub fn health(&self) -> HealthReport {
        let circuits = self.all_snapshots();
        let mut open_circuits: Vec<String> = circuits
            .values()
            .filter(|s| s.state == CircuitState::Open)
            .map(|s| s.name.clone())
            .collect();
        open_circuits.sort();

        HealthReport {
            status: if open_circuits.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            open_circuits,
            total_circuits: circuits.len(),
            circuits,
        }
    }

    /// Number of breakers in the registry
    pub fn len(&self) -> usize {
        self.breakers.lock().len()
    }

    /// Whether the registry holds no breakers
    pub fn is_empty(&self) -> bool {
        self.breakers.lock().is_empty()
    }

    fn build(name: &str, config: CircuitBreakerConfig, clock: &C) -> CircuitBreaker<C> {
        // Callers validate before reaching here.
        CircuitBreaker::new_unchecked(name, config, clock.clone())
    }
}

impl<C: Clock + Clone> std::fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry").field("breakers", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::time::MockClock;

    #[test]
    fn test_get_creates_on_first_use() {
        let registry = CircuitBreakerRegistry::new();
        assert!(registry.is_empty());

        let breaker = registry.get("payments");
        assert_eq!(breaker.name(), "payments");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_returns_same_instance() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get("payments");
        let b = registry.get("payments");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_get_with_config_only_applies_on_first_create() {
        let registry = CircuitBreakerRegistry::new();
        let first = registry
            .get_with_config(
                "search",
                CircuitBreakerConfig::builder().failure_threshold(1).build().unwrap(),
            )
            .unwrap();

        // Second call with a different config still returns the original.
        let second = registry
            .get_with_config(
                "search",
                CircuitBreakerConfig::builder().failure_threshold(99).build().unwrap(),
            )
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        first.record_failure();
        assert_eq!(first.state(), CircuitState::Open, "first config's threshold applies");
    }

    #[test]
    fn test_get_with_invalid_config_fails() {
        let registry = CircuitBreakerRegistry::new();
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(registry.get_with_config("bad", config).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove() {
        let registry = CircuitBreakerRegistry::new();
        let original = registry.get("payments");

        assert!(registry.remove("payments"));
        assert!(!registry.remove("payments"));

        let replacement = registry.get("payments");
        assert!(!Arc::ptr_eq(&original, &replacement));
    }

    #[test]
    fn test_reset_all() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry
            .get_with_config(
                "a",
                CircuitBreakerConfig::builder().failure_threshold(1).build().unwrap(),
            )
            .unwrap();
        let b = registry.get("b");

        a.record_failure();
        assert_eq!(a.state(), CircuitState::Open);

        registry.reset_all();
        assert_eq!(a.state(), CircuitState::Closed);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_health_degraded_when_any_circuit_open() {
        let clock = MockClock::new();
        let registry = CircuitBreakerRegistry::with_clock(clock);
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap();

        registry.get("healthy-dep");
        let failing = registry.get_with_config("failing-dep", config).unwrap();

        let report = registry.health();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.open_circuits.is_empty());
        assert_eq!(report.total_circuits, 2);

        failing.record_failure();
        let report = registry.health();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.open_circuits, vec!["failing-dep".to_string()]);
    }

    #[test]
    fn test_half_open_counts_as_healthy() {
        let clock = MockClock::new();
        let registry = CircuitBreakerRegistry::with_clock(clock.clone());
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        let breaker = registry.get_with_config("dep", config).unwrap();
        breaker.record_failure();
        clock.advance_secs(11);
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert_eq!(registry.health().status, HealthStatus::Healthy);
    }

    #[test]
    fn test_concurrent_get_shares_one_breaker() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || registry.get("shared")));
        }

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.len(), 1);
        for pair in breakers.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
    }

    #[test]
    fn test_health_report_serializes() {
        let registry = CircuitBreakerRegistry::new();
        registry.get("payments");

        let json = serde_json::to_value(registry.health()).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["total_circuits"], 1);
        assert!(json["circuits"]["payments"].is_object());
    }
}
