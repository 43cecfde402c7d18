//! Time abstraction for deterministic testing
//!
//! Breaker timeouts and cache ages are time-based, so every component that
//! needs "now" takes a [`Clock`] instead of calling `Instant::now()` directly.
//! Production code uses [`SystemClock`]; tests drive [`MockClock`] to simulate
//! elapsed time without sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};

/// Trait for time operations.
///
/// `now()` is monotonic and drives timeout arithmetic; `system_time()` is the
/// wall clock used for human-facing timestamps in metrics and snapshots.
pub trait Clock: Send + Sync + 'static {
    /// Get the current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get the current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get the wall clock as a UTC datetime
    fn utc_now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.system_time())
    }
}

/// Real system clock for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic tests.
///
/// Clones share the same underlying elapsed counter, so a test can hand a
/// clone to the component under test and advance time from the outside.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Advance the mock clock by whole seconds
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Get the total simulated elapsed time
    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a, "System clock should never go backwards");
    }

    #[test]
    fn test_system_clock_wall_time() {
        let clock = SystemClock;
        assert!(clock.system_time() > SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn test_mock_clock_starts_at_zero() {
        let clock = MockClock::new();
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));

        clock.advance_secs(10);
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(15));
    }

    #[test]
    fn test_mock_clock_clones_share_state() {
        let clock1 = MockClock::new();
        let clock2 = clock1.clone();

        clock1.advance(Duration::from_secs(30));
        assert_eq!(clock2.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn test_mock_clock_utc_now_tracks_elapsed() {
        let clock = MockClock::new();
        clock.advance_secs(42);

        let ts = clock.utc_now();
        assert_eq!(ts.timestamp(), 42);
    }
}
