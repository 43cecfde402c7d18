//! In-memory collaborators for tests and examples
//!
//! These are real, working implementations of the cache and source traits,
//! small enough to reason about in a test. They are part of the public API so
//! downstream crates can use them in their own test suites.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

use crate::error::BoxedError;
use crate::fallback::{CachedEntry, FallbackCache, NamedSource};
use crate::time::{Clock, SystemClock};

/// Simple string error for exercising failure paths in tests
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TestError {
    message: String,
}

impl TestError {
    /// Create an error with the given message
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self { message: message.into() }
    }
}

struct StoredEntry {
    data: Value,
    stored_at: Instant,
    ttl: Duration,
}

/// In-memory [`FallbackCache`] with no eviction.
///
/// Entries past their TTL are kept and served with `stale` set, per the
/// [`FallbackCache`] contract. Ages are computed against the injected clock,
/// so tests can advance a [`crate::time::MockClock`] instead of sleeping.
pub struct MemoryCache<C: Clock = SystemClock> {
    entries: Mutex<HashMap<String, StoredEntry>>,
    clock: C,
}

impl MemoryCache<SystemClock> {
    /// Create an empty cache using the system clock
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryCache<C> {
    /// Create an empty cache against a custom clock
    pub fn with_clock(clock: C) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock }
    }

    /// Number of stored entries, including stale ones
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl<C: Clock> FallbackCache for MemoryCache<C> {
    async fn get(&self, key: &str) -> Option<CachedEntry> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        let age = self.clock.now().saturating_duration_since(entry.stored_at);
        Some(CachedEntry { data: entry.data.clone(), age, stale: age > entry.ttl })
    }

    async fn put(&self, key: &str, data: &Value, ttl: Duration) -> Result<(), BoxedError> {
        self.entries.lock().insert(
            key.to_string(),
            StoredEntry { data: data.clone(), stored_at: self.clock.now(), ttl },
        );
        Ok(())
    }
}

/// Cache that fails every write and misses every read, for exercising the
/// degraded-cache path.
#[derive(Debug, Default)]
pub struct FailingCache;

#[async_trait]
impl FallbackCache for FailingCache {
    async fn get(&self, _key: &str) -> Option<CachedEntry> {
        None
    }

    async fn put(&self, _key: &str, _data: &Value, _ttl: Duration) -> Result<(), BoxedError> {
        Err(Box::new(TestError::new("cache backend unavailable")))
    }
}

/// [`NamedSource`] returning a fixed payload for every operation
#[derive(Debug, Clone)]
pub struct StaticSource {
    payload: Value,
}

impl StaticSource {
    /// Create a source that always resolves to `payload`
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl NamedSource for StaticSource {
    async fn resolve(&self, _operation: &str, _params: &BTreeMap<String, String>) -> Option<Value> {
        Some(self.payload.clone())
    }
}

/// Operation stub that fails a fixed number of times before succeeding.
///
/// Call counting is atomic so the stub can be shared across tasks.
pub struct FlakyOperation {
    failures_remaining: AtomicU32,
    calls: AtomicU32,
    payload: Value,
}

impl FlakyOperation {
    /// Succeed only after the first `failures` calls have failed
    pub fn new(failures: u32, payload: Value) -> Self {
        Self { failures_remaining: AtomicU32::new(failures), calls: AtomicU32::new(0), payload }
    }

    /// Run one call against the stub
    pub async fn call(&self) -> Result<Value, TestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(TestError::new("simulated upstream failure"));
        }
        Ok(self.payload.clone())
    }

    /// How many times `call` has run
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
