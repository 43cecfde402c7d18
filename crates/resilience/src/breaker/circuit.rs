//! Per-dependency circuit breaker state machine
//!
//! The breaker decides whether a call against its dependency may proceed and
//! records outcomes. It is a perpetual control loop over three states:
//!
//! ```text
//! Closed    → Open      failure_count reaches failure_threshold
//! Open      → HalfOpen  timeout elapsed since last failure AND a call is
//!                       attempted (lazy, no background timer)
//! HalfOpen  → Closed    success_threshold consecutive successes
//! HalfOpen  → Open      any single failure
//! ```
//!
//! Every field is guarded by one mutex; critical sections are O(1) and never
//! perform I/O. Transition hooks run after the lock is released and their
//! panics are caught and logged, never propagated.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::time::{Clock, SystemClock};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited probe requests
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Callback fired on a state transition, receiving the breaker name.
///
/// Hooks must not assume they run on any particular thread. A panicking hook
/// is caught and logged; it never affects breaker state or the caller.
pub type TransitionHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration for circuit breaker behavior. Immutable after construction.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive successes needed to close the circuit from half-open
    pub success_threshold: u32,
    /// Time to wait before an open circuit admits a probe
    pub timeout: Duration,
    /// Maximum number of calls admitted in half-open state
    pub half_open_max_calls: u32,
    /// Fired when the circuit opens
    pub on_open: Option<TransitionHook>,
    /// Fired when the circuit transitions to half-open
    pub on_half_open: Option<TransitionHook>,
    /// Fired when the circuit closes
    pub on_close: Option<TransitionHook>,
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("timeout", &self.timeout)
            .field("half_open_max_calls", &self.half_open_max_calls)
            .field("on_open", &self.on_open.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            on_open: None,
            on_half_open: None,
            on_close: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn on_open<F: Fn(&str) + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.config.on_open = Some(Arc::new(hook));
        self
    }

    pub fn on_half_open<F: Fn(&str) + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.config.on_half_open = Some(Arc::new(hook));
        self
    }

    pub fn on_close<F: Fn(&str) + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.config.on_close = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Monotonically increasing counters for monitoring.
///
/// Counters survive `reset()`: operational overrides clear the breaker's
/// working state, not its history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that reached `record_success` or `record_failure`
    pub total_calls: u64,
    /// Successful calls
    pub successful_calls: u64,
    /// Failed calls
    pub failed_calls: u64,
    /// Calls rejected by `can_execute`
    pub rejected_calls: u64,
    /// State transitions, including administrative ones
    pub state_changes: u64,
    /// Wall-clock time of the most recent failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Wall-clock time of the most recent success
    pub last_success_time: Option<DateTime<Utc>>,
}

/// Read-only view of a breaker for dashboards and health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    /// Dependency name this breaker guards
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures observed
    pub failure_count: u32,
    /// Consecutive successes observed in half-open
    pub success_count: u32,
    /// Wall-clock time of the most recent failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Monotonic counters
    pub metrics: CircuitBreakerMetrics,
}

/// Mutable breaker state, all behind one mutex.
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure: Option<Instant>,
    metrics: CircuitBreakerMetrics,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            last_failure: None,
            metrics: CircuitBreakerMetrics::default(),
        }
    }
}

/// Per-dependency circuit breaker.
///
/// Created once per dependency name (usually through the registry) and shared
/// via `Arc` across any number of threads. All operations are synchronous,
/// in-memory, and never fail.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the given configuration using the system clock
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }

    /// Create a breaker with the default configuration.
    ///
    /// The default config is statically valid, so this cannot fail.
    pub fn with_defaults<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            inner: Mutex::new(BreakerInner::new()),
            clock: SystemClock,
        }
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing)
    pub fn with_clock<S: Into<String>>(
        name: S,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::new_unchecked(name, config, clock))
    }

    /// Construct without validating; callers must have validated the config.
    pub(crate) fn new_unchecked<S: Into<String>>(
        name: S,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Self {
        Self { name: name.into(), config, inner: Mutex::new(BreakerInner::new()), clock }
    }

    /// Dependency name this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state of the circuit
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Check whether the breaker allows a call to proceed.
    ///
    /// In `Closed`, always true. In `Open`, true only once the configured
    /// timeout has elapsed since the last failure, in which case the breaker
    /// transitions to `HalfOpen` and this call becomes the probe. In
    /// `HalfOpen`, true while fewer than `half_open_max_calls` further calls
    /// have been admitted. Every rejection increments `rejected_calls`.
    pub fn can_execute(&self) -> bool {
        let mut hook = None;
        let allowed = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => {
                    let elapsed = inner
                        .last_failure
                        .map(|at| self.clock.now().saturating_duration_since(at));
                    if elapsed.is_some_and(|e| e >= self.config.timeout) {
                        inner.state = CircuitState::HalfOpen;
                        inner.success_count = 0;
                        // The transition-triggering probe rides for free; the
                        // half-open budget applies to calls after it.
                        inner.half_open_calls = 0;
                        inner.metrics.state_changes += 1;
                        hook = self.config.on_half_open.clone();
                        true
                    } else {
                        inner.metrics.rejected_calls += 1;
                        false
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_calls < self.config.half_open_max_calls {
                        inner.half_open_calls += 1;
                        true
                    } else {
                        inner.metrics.rejected_calls += 1;
                        false
                    }
                }
            }
        };

        if let Some(hook) = hook {
            info!(breaker = %self.name, "Circuit breaker transitioned to HALF_OPEN");
            self.fire(&hook, "on_half_open");
        } else if !allowed {
            debug!(breaker = %self.name, "Circuit breaker rejected call");
        }
        allowed
    }

    /// Record a successful call.
    ///
    /// In `HalfOpen`, reaching `success_threshold` consecutive successes
    /// closes the circuit. In `Closed`, a success clears the failure streak.
    pub fn record_success(&self) {
        let mut hook = None;
        {
            let mut inner = self.inner.lock();
            inner.metrics.total_calls += 1;
            inner.metrics.successful_calls += 1;
            inner.metrics.last_success_time = Some(self.clock.utc_now());

            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                }
                CircuitState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.success_count = 0;
                        inner.half_open_calls = 0;
                        inner.metrics.state_changes += 1;
                        hook = self.config.on_close.clone();
                    }
                }
                CircuitState::Open => {
                    // A straggler from before the circuit opened; counted but
                    // it does not move the state machine.
                    warn!(breaker = %self.name, "Success recorded while circuit is open");
                }
            }
        }

        if let Some(hook) = hook {
            info!(breaker = %self.name, "Circuit breaker closed after successful probes");
            self.fire(&hook, "on_close");
        }
    }

    /// Record a failed call.
    ///
    /// In `Closed`, reaching `failure_threshold` consecutive failures opens
    /// the circuit. In `HalfOpen`, any failure reopens it immediately.
    pub fn record_failure(&self) {
        let mut hook = None;
        let failures;
        {
            let mut inner = self.inner.lock();
            inner.metrics.total_calls += 1;
            inner.metrics.failed_calls += 1;
            inner.metrics.last_failure_time = Some(self.clock.utc_now());
            inner.last_failure = Some(self.clock.now());
            inner.failure_count += 1;
            failures = inner.failure_count;

            match inner.state {
                CircuitState::Closed => {
                    if inner.failure_count >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.success_count = 0;
                        inner.half_open_calls = 0;
                        inner.metrics.state_changes += 1;
                        hook = self.config.on_open.clone();
                    }
                }
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.success_count = 0;
                    inner.half_open_calls = 0;
                    inner.metrics.state_changes += 1;
                    hook = self.config.on_open.clone();
                }
                CircuitState::Open => {}
            }
        }

        if let Some(hook) = hook {
            warn!(breaker = %self.name, failures, "Circuit breaker opened");
            self.fire(&hook, "on_open");
        }
    }

    /// Force the circuit open, regardless of counters.
    ///
    /// Performs the same side effects as the natural open path: the open
    /// timeout starts now and `on_open` fires. No-op if already open.
    pub fn force_open(&self) {
        let mut hook = None;
        {
            let mut inner = self.inner.lock();
            if inner.state != CircuitState::Open {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.half_open_calls = 0;
                inner.last_failure = Some(self.clock.now());
                inner.metrics.state_changes += 1;
                hook = self.config.on_open.clone();
            }
        }
        if let Some(hook) = hook {
            info!(breaker = %self.name, "Circuit breaker forced open");
            self.fire(&hook, "on_open");
        }
    }

    /// Force the circuit closed, clearing the working counters.
    ///
    /// Performs the same side effects as the natural close path, including
    /// firing `on_close`. No-op if already closed.
    pub fn force_close(&self) {
        let mut hook = None;
        {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.half_open_calls = 0;
            if inner.state != CircuitState::Closed {
                inner.state = CircuitState::Closed;
                inner.metrics.state_changes += 1;
                hook = self.config.on_close.clone();
            }
        }
        if let Some(hook) = hook {
            info!(breaker = %self.name, "Circuit breaker forced closed");
            self.fire(&hook, "on_close");
        }
    }

    /// Reset the breaker to its initial state.
    ///
    /// Clears working counters and the failure timestamp. Monotonic metrics
    /// counters are preserved; only `state_changes` moves if a transition
    /// actually happens.
    pub fn reset(&self) {
        self.force_close();
        let mut inner = self.inner.lock();
        inner.last_failure = None;
    }

    /// Remaining open time, usable as a retry hint.
    ///
    /// `None` unless the circuit is currently open.
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        inner.last_failure.map(|at| {
            let elapsed = self.clock.now().saturating_duration_since(at);
            self.config.timeout.saturating_sub(elapsed)
        })
    }

    /// Read-only snapshot for introspection
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.metrics.last_failure_time,
            metrics: inner.metrics.clone(),
        }
    }

    /// Current metrics counters
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().metrics.clone()
    }

    /// Run a transition hook, containing any panic it raises.
    fn fire(&self, hook: &TransitionHook, event: &str) {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| hook(&self.name)));
        if result.is_err() {
            warn!(breaker = %self.name, event, "Transition hook panicked; ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::time::MockClock;

    fn breaker_with(
        failure_threshold: u32,
        success_threshold: u32,
        timeout: Duration,
        half_open_max_calls: u32,
        clock: MockClock,
    ) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(failure_threshold)
            .success_threshold(success_threshold)
            .timeout(timeout)
            .half_open_max_calls(half_open_max_calls)
            .build()
            .expect("valid config");
        CircuitBreaker::with_clock("test-dep", config, clock).expect("valid breaker")
    }

    #[test]
    fn test_config_default() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.half_open_max_calls, 3);
    }

    #[test]
    fn test_config_validation_rejects_zero_thresholds() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().success_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().half_open_max_calls(0).build().is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn test_starts_closed_and_allows_calls() {
        let cb = CircuitBreaker::with_defaults("dep");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_opens_after_exact_failure_threshold() {
        let cb = breaker_with(3, 2, Duration::from_secs(60), 3, MockClock::new());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed, "below threshold stays closed");

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open, "threshold reached opens circuit");
    }

    #[test]
    fn test_open_rejects_and_counts_rejections() {
        let cb = breaker_with(1, 2, Duration::from_secs(60), 3, MockClock::new());
        cb.record_failure();

        assert!(!cb.can_execute());
        assert!(!cb.can_execute());
        assert_eq!(cb.metrics().rejected_calls, 2);
    }

    #[test]
    fn test_success_in_closed_resets_failure_streak() {
        let cb = breaker_with(3, 2, Duration::from_secs(60), 3, MockClock::new());

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.snapshot().failure_count, 0);

        // The streak starts over; two more failures do not open the circuit.
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_to_half_open_after_timeout() {
        let clock = MockClock::new();
        let cb = breaker_with(1, 2, Duration::from_secs(60), 3, clock.clone());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance_secs(59);
        assert!(!cb.can_execute(), "timeout not elapsed yet");

        clock.advance_secs(2);
        assert!(cb.can_execute(), "first call after timeout is the probe");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_admits_at_most_max_calls() {
        let clock = MockClock::new();
        let cb = breaker_with(1, 5, Duration::from_secs(10), 3, clock.clone());

        cb.record_failure();
        clock.advance_secs(11);

        // The probe transitions the state, then the half-open budget admits
        // up to three more calls.
        assert!(cb.can_execute());
        assert!(cb.can_execute());
        assert!(cb.can_execute());
        assert!(cb.can_execute());

        let rejected_before = cb.metrics().rejected_calls;
        assert!(!cb.can_execute(), "call beyond half_open_max_calls is rejected");
        assert_eq!(cb.metrics().rejected_calls, rejected_before + 1);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let clock = MockClock::new();
        let cb = breaker_with(1, 2, Duration::from_secs(10), 3, clock.clone());

        cb.record_failure();
        clock.advance_secs(11);
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[test]
    fn test_half_open_reopens_on_any_failure() {
        let clock = MockClock::new();
        let cb = breaker_with(1, 3, Duration::from_secs(10), 5, clock.clone());

        cb.record_failure();
        clock.advance_secs(11);
        assert!(cb.can_execute());

        cb.record_success();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open, "prior successes do not matter");
    }

    #[test]
    fn test_reopened_circuit_honors_timeout_again() {
        let clock = MockClock::new();
        let cb = breaker_with(1, 2, Duration::from_secs(10), 3, clock.clone());

        cb.record_failure();
        clock.advance_secs(11);
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(!cb.can_execute());
        clock.advance_secs(11);
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_force_open_and_retry_after() {
        let clock = MockClock::new();
        let cb = breaker_with(5, 2, Duration::from_secs(60), 3, clock.clone());

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        clock.advance_secs(20);
        let hint = cb.retry_after().expect("open circuit reports retry hint");
        assert_eq!(hint, Duration::from_secs(40));
    }

    #[test]
    fn test_retry_after_none_when_closed() {
        let cb = CircuitBreaker::with_defaults("dep");
        assert_eq!(cb.retry_after(), None);
    }

    #[test]
    fn test_force_close_reopens_traffic() {
        let cb = breaker_with(1, 2, Duration::from_secs(60), 3, MockClock::new());
        cb.record_failure();
        assert!(!cb.can_execute());

        cb.force_close();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_reset_preserves_monotonic_metrics() {
        let cb = breaker_with(1, 2, Duration::from_secs(60), 3, MockClock::new());
        cb.record_failure();
        assert!(!cb.can_execute());

        cb.reset();
        let metrics = cb.metrics();
        assert_eq!(metrics.failed_calls, 1);
        assert_eq!(metrics.rejected_calls, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[test]
    fn test_hooks_fire_on_transitions() {
        let opens = Arc::new(AtomicU32::new(0));
        let half_opens = Arc::new(AtomicU32::new(0));
        let closes = Arc::new(AtomicU32::new(0));

        let (o, h, c) = (Arc::clone(&opens), Arc::clone(&half_opens), Arc::clone(&closes));
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .success_threshold(1)
            .timeout(Duration::from_secs(10))
            .on_open(move |_| {
                o.fetch_add(1, Ordering::SeqCst);
            })
            .on_half_open(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .expect("valid config");

        let clock = MockClock::new();
        let cb = CircuitBreaker::with_clock("dep", config, clock.clone()).expect("valid breaker");

        cb.record_failure();
        clock.advance_secs(11);
        assert!(cb.can_execute());
        cb.record_success();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(half_opens.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_hook_does_not_poison_breaker() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .on_open(|_| panic!("hook blew up"))
            .build()
            .expect("valid config");
        let cb = CircuitBreaker::new("dep", config).expect("valid breaker");

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open, "state change sticks despite hook panic");
        cb.force_close();
        assert!(cb.can_execute());
    }

    #[test]
    fn test_snapshot_serializes() {
        let cb = CircuitBreaker::with_defaults("pricing-api");
        cb.record_success();

        let json = serde_json::to_value(cb.snapshot()).expect("snapshot serializes");
        assert_eq!(json["name"], "pricing-api");
        assert_eq!(json["state"], "closed");
        assert_eq!(json["metrics"]["successful_calls"], 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let cb = Arc::new(CircuitBreaker::with_defaults("dep"));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let cb = Arc::clone(&cb);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    cb.record_success();
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }

        assert_eq!(cb.metrics().successful_calls, 800);
    }
}
