//! Graceful-shutdown admission control
//!
//! The coordinator tracks in-flight work by identifier and gates new
//! admissions behind a shutdown flag. Once shutdown is requested, new work is
//! rejected with a structured, retryable response while already-admitted work
//! runs to completion. `drain` waits for the in-flight set to empty, bounded
//! by a timeout, and reports what was still running if it gave up.
//!
//! All state sits behind one mutex; admit and release are O(1) set
//! operations. Draining polls rather than signalling, which keeps release on
//! the hot path free of wakeup bookkeeping.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Tuning knobs for drain behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Default bound for `drain_default`
    pub drain_timeout: Duration,
    /// How often `drain` re-checks the in-flight set
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_timeout: Duration::from_secs(30), poll_interval: Duration::from_millis(50) }
    }
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownStatus {
    /// Whether shutdown has been requested
    pub shutdown_requested: bool,
    /// Number of requests currently in flight
    pub active_count: usize,
    /// Identifiers of in-flight requests, sorted
    pub active_ids: Vec<String>,
    /// Default drain bound, in seconds
    pub drain_timeout_seconds: u64,
}

/// Structured rejection payload for requests refused during shutdown.
///
/// Shaped for a 503 response body; `retry_after_seconds` maps onto the
/// Retry-After header.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownRejection {
    /// Always "rejected"
    pub status: &'static str,
    /// Human-readable explanation
    pub reason: &'static str,
    /// Suggested wait before retrying against another instance
    pub retry_after_seconds: u64,
}

/// Outcome of a drain attempt
#[derive(Debug, Clone, Serialize)]
pub struct DrainReport {
    /// True if the in-flight set emptied before the timeout
    pub completed: bool,
    /// Identifiers still in flight when the drain gave up, sorted
    pub remaining: Vec<String>,
    /// How long the drain actually took
    pub elapsed: Duration,
}

struct CoordinatorInner {
    shutdown_requested: bool,
    active: HashSet<String>,
}

/// Tracks in-flight work and refuses new admissions once shutdown starts.
///
/// Shared via `Arc`; every method takes `&self`.
pub struct ShutdownCoordinator {
    inner: Mutex<CoordinatorInner>,
    config: ShutdownConfig,
}

impl ShutdownCoordinator {
    /// Create a coordinator with default drain settings
    pub fn new() -> Self {
        Self::with_config(ShutdownConfig::default())
    }

    /// Create a coordinator with custom drain settings
    pub fn with_config(config: ShutdownConfig) -> Self {
        Self {
            inner: Mutex::new(CoordinatorInner {
                shutdown_requested: false,
                active: HashSet::new(),
            }),
            config,
        }
    }

    /// Try to admit a unit of work.
    ///
    /// Returns false once shutdown has been requested; the caller must then
    /// reject the request without starting it. Admitting the same identifier
    /// twice is a caller bug but harmless; the set deduplicates.
    pub fn admit(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.shutdown_requested {
            debug!(request = id, "Admission refused, shutdown in progress");
            return false;
        }
        inner.active.insert(id.to_string());
        true
    }

    /// Mark a previously admitted unit of work as finished.
    ///
    /// Must be called exactly once per successful `admit`, on every exit
    /// path. Safe to call unconditionally: releasing an identifier that was
    /// never admitted (or was rejected) is a no-op.
    pub fn release(&self, id: &str) {
        let mut inner = self.inner.lock();
        if !inner.active.remove(id) {
            debug!(request = id, "Release for id not in the active set");
        }
    }

    /// Flip the shutdown flag. Idempotent; in-flight work is unaffected.
    pub fn request_shutdown(&self) {
        let mut inner = self.inner.lock();
        if !inner.shutdown_requested {
            inner.shutdown_requested = true;
            info!(active = inner.active.len(), "Shutdown requested, refusing new work");
        }
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutdown_requested
    }

    /// Number of requests currently in flight
    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Point-in-time status snapshot
    pub fn status(&self) -> ShutdownStatus {
        let inner = self.inner.lock();
        let mut active_ids: Vec<String> = inner.active.iter().cloned().collect();
        active_ids.sort();
        ShutdownStatus {
            shutdown_requested: inner.shutdown_requested,
            active_count: active_ids.len(),
            active_ids,
            drain_timeout_seconds: self.config.drain_timeout.as_secs(),
        }
    }

    /// Rejection payload for a request refused during shutdown
    pub fn rejection(&self) -> ShutdownRejection {
        ShutdownRejection {
            status: "rejected",
            reason: "shutdown in progress",
            retry_after_seconds: self.config.drain_timeout.as_secs(),
        }
    }

    /// The drain settings this coordinator was built with
    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Wait for in-flight work to finish, bounded by the timeout.
    ///
    /// Draining without refusing new admissions could wait forever, so this
    /// first flips the shutdown flag, exactly as [`Self::request_shutdown`]
    /// would. Calling `request_shutdown` beforehand is fine; the flip is
    /// idempotent. Returns as soon as the in-flight set is empty. On timeout
    /// the report lists what was still running; the caller decides whether
    /// to abort.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        self.request_shutdown();
        let started = Instant::now();

        loop {
            let remaining = {
                let inner = self.inner.lock();
                if inner.active.is_empty() {
                    Vec::new()
                } else {
                    inner.active.iter().cloned().collect()
                }
            };

            if remaining.is_empty() {
                let elapsed = started.elapsed();
                info!(elapsed_ms = elapsed.as_millis() as u64, "Drain complete");
                return DrainReport { completed: true, remaining, elapsed };
            }

            if started.elapsed() >= timeout {
                let mut remaining = remaining;
                remaining.sort();
                warn!(
                    remaining = remaining.len(),
                    "Drain timed out with requests still in flight"
                );
                return DrainReport { completed: false, remaining, elapsed: started.elapsed() };
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Drain using the configured default timeout
    pub async fn drain_default(&self) -> DrainReport {
        self.drain(self.config.drain_timeout).await
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ShutdownCoordinator")
            .field("shutdown_requested", &inner.shutdown_requested)
            .field("active", &inner.active.len())
            .finish()
    }
}

/// RAII admission token.
///
/// Acquiring a guard admits the request; dropping it releases, so the
/// in-flight count stays correct on every exit path including early returns
/// and panics.
#[must_use = "dropping the guard immediately releases the admission"]
pub struct AdmissionGuard {
    coordinator: Arc<ShutdownCoordinator>,
    id: String,
}

impl AdmissionGuard {
    /// Try to admit `id`, returning a guard that releases on drop.
    ///
    /// `None` means shutdown is in progress and the request must be rejected.
    pub fn acquire(coordinator: &Arc<ShutdownCoordinator>, id: &str) -> Option<Self> {
        if coordinator.admit(id) {
            Some(Self { coordinator: Arc::clone(coordinator), id: id.to_string() })
        } else {
            None
        }
    }

    /// The admitted request identifier
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.coordinator.release(&self.id);
    }
}

impl std::fmt::Debug for AdmissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_before_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.admit("req-1"));
        assert!(coordinator.admit("req-2"));
        assert_eq!(coordinator.active_count(), 2);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.admit("req-1"));

        coordinator.request_shutdown();
        assert!(!coordinator.admit("req-2"));
        assert_eq!(coordinator.active_count(), 1, "in-flight work is unaffected");
    }

    #[test]
    fn test_request_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown();
        coordinator.request_shutdown();
        assert!(coordinator.is_shutting_down());
    }

    #[test]
    fn test_release_unknown_id_is_noop() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.release("never-admitted");
        assert_eq!(coordinator.active_count(), 0);
    }

    #[test]
    fn test_status_lists_sorted_active_ids() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.admit("req-b");
        coordinator.admit("req-a");

        let status = coordinator.status();
        assert!(!status.shutdown_requested);
        assert_eq!(status.active_ids, vec!["req-a".to_string(), "req-b".to_string()]);
    }

    #[test]
    fn test_rejection_payload_shape() {
        let coordinator = ShutdownCoordinator::with_config(ShutdownConfig {
            drain_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
        });

        let json = serde_json::to_value(coordinator.rejection()).unwrap();
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["retry_after_seconds"], 30);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let coordinator = Arc::new(ShutdownCoordinator::new());

        {
            let guard = AdmissionGuard::acquire(&coordinator, "req-1").unwrap();
            assert_eq!(guard.id(), "req-1");
            assert_eq!(coordinator.active_count(), 1);
        }
        assert_eq!(coordinator.active_count(), 0);
    }

    #[test]
    fn test_guard_denied_during_shutdown() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        coordinator.request_shutdown();
        assert!(AdmissionGuard::acquire(&coordinator, "req-1").is_none());
    }

    #[tokio::test]
    async fn test_drain_completes_immediately_when_idle() {
        let coordinator = ShutdownCoordinator::new();
        let report = coordinator.drain(Duration::from_secs(1)).await;
        assert!(report.completed);
        assert!(report.remaining.is_empty());
    }

    #[tokio::test]
    async fn test_drain_waits_for_releases() {
        let coordinator = Arc::new(ShutdownCoordinator::with_config(ShutdownConfig {
            drain_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
        }));
        coordinator.admit("req-1");

        let background = Arc::clone(&coordinator);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            background.release("req-1");
        });

        let report = coordinator.drain(Duration::from_secs(5)).await;
        assert!(report.completed);
        assert_eq!(coordinator.active_count(), 0);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_timeout_reports_stragglers() {
        let coordinator = ShutdownCoordinator::with_config(ShutdownConfig {
            drain_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(5),
        });
        coordinator.admit("req-slow");
        coordinator.admit("req-slower");

        let report = coordinator.drain(Duration::from_millis(40)).await;
        assert!(!report.completed);
        assert_eq!(
            report.remaining,
            vec!["req-slow".to_string(), "req-slower".to_string()]
        );
        assert!(report.elapsed >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_drain_sets_shutdown_flag() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.drain(Duration::from_millis(10)).await;
        assert!(coordinator.is_shutting_down());
        assert!(!coordinator.admit("late"));
    }
}
