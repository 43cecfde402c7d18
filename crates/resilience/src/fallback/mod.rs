//! Tiered fallback resolution for guarded operations
//!
//! When a primary operation cannot run (circuit open) or fails, the resolver
//! walks a fixed chain of degraded tiers and returns the first one that
//! produces data:
//!
//! ```text
//! 1. primary operation   → Verified
//! 2. cache               → High    (carries the entry's age)
//! 3. named source        → Estimated
//! 4. static default      → Low
//! 5. nothing             → the original error is surfaced
//! ```
//!
//! Every result records which tier produced it and why the primary was
//! bypassed, so callers can tell fresh data from degraded data.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::error::{BoxedError, ResilienceError, ResilienceResult};
use crate::time::{Clock, SystemClock};

/// Parameter keys that must never appear in a cache key.
const SECRET_MARKERS: &[&str] = &["token", "secret", "password", "api_key", "apikey", "authorization"];

/// Escape the cache-key separators (and the escape character itself) inside a
/// single name, key, or value component. Keeps key derivation injective:
/// a value containing `:` or `=` cannot forge another request's pair layout.
fn escape_key_component(component: &str) -> String {
    let mut escaped = String::with_capacity(component.len());
    for ch in component.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '=' => escaped.push_str("%3D"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// A cached value together with its age at read time
#[derive(Debug, Clone)]
pub struct CachedEntry {
    /// The cached payload
    pub data: Value,
    /// How long ago the entry was stored
    pub age: Duration,
    /// Whether the entry has outlived its time-to-live
    pub stale: bool,
}

/// Storage backend for the cache fallback tier.
///
/// Implementations decide eviction and persistence; the resolver only needs
/// get and put. A failing `put` degrades the cache tier but never fails the
/// call that produced the data.
#[async_trait]
pub trait FallbackCache: Send + Sync {
    /// Look up a previously stored entry. `None` only for keys the backend
    /// does not hold: a degraded answer beats no answer, so entries past
    /// their time-to-live are still returned, with `stale` set and their
    /// real age, rather than dropped.
    async fn get(&self, key: &str) -> Option<CachedEntry>;

    /// Store a fresh value with the given time-to-live.
    async fn put(&self, key: &str, data: &Value, ttl: Duration) -> Result<(), BoxedError>;
}

/// A secondary data source consulted when both the primary operation and the
/// cache come up empty. Results from here are estimates, not ground truth.
#[async_trait]
pub trait NamedSource: Send + Sync {
    /// Produce a substitute value for the operation, or `None` if this source
    /// has nothing to offer.
    async fn resolve(&self, operation: &str, params: &BTreeMap<String, String>) -> Option<Value>;
}

/// Which tier produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSource {
    /// The primary operation succeeded
    Api,
    /// Served from the cache tier
    Cache,
    /// Served by a registered named source
    NamedSource,
    /// The request's static default
    Static,
}

/// How much the caller should trust a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Known stale or hardcoded
    Low,
    /// Derived from a secondary source
    Estimated,
    /// Plausible but unconfirmed
    Medium,
    /// Recently cached primary data
    High,
    /// Fresh from the primary operation
    Verified,
}

/// The outcome of a guarded call, annotated with provenance
#[derive(Debug, Clone, Serialize)]
pub struct FallbackResult {
    /// The payload
    pub data: Value,
    /// Which tier produced the payload
    pub source: FallbackSource,
    /// Trust level for the payload
    pub confidence: Confidence,
    /// Operation name the request was made under
    pub api_name: String,
    /// Why the primary operation was bypassed, when it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Age of the cache entry, present only for cache-tier results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_seconds: Option<u64>,
    /// Free-form annotations
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl FallbackResult {
    /// Fresh result from the primary operation
    pub fn api<S: Into<String>>(api_name: S, data: Value) -> Self {
        Self {
            data,
            source: FallbackSource::Api,
            confidence: Confidence::Verified,
            api_name: api_name.into(),
            fallback_reason: None,
            cache_age_seconds: None,
            metadata: HashMap::new(),
        }
    }

    /// Result served from the cache tier
    pub fn from_cache<S: Into<String>>(
        api_name: S,
        data: Value,
        age: Duration,
        reason: String,
    ) -> Self {
        Self {
            data,
            source: FallbackSource::Cache,
            confidence: Confidence::High,
            api_name: api_name.into(),
            fallback_reason: Some(reason),
            cache_age_seconds: Some(age.as_secs()),
            metadata: HashMap::new(),
        }
    }

    /// Result served by a named secondary source
    pub fn from_named_source<S: Into<String>>(api_name: S, data: Value, reason: String) -> Self {
        Self {
            data,
            source: FallbackSource::NamedSource,
            confidence: Confidence::Estimated,
            api_name: api_name.into(),
            fallback_reason: Some(reason),
            cache_age_seconds: None,
            metadata: HashMap::new(),
        }
    }

    /// Result served from the request's static default
    pub fn from_static<S: Into<String>>(api_name: S, data: Value, reason: String) -> Self {
        Self {
            data,
            source: FallbackSource::Static,
            confidence: Confidence::Low,
            api_name: api_name.into(),
            fallback_reason: Some(reason),
            cache_age_seconds: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata annotation
    #[must_use]
    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether this result came from a degraded tier
    pub fn is_fallback(&self) -> bool {
        self.source != FallbackSource::Api
    }
}

/// Describes one guarded call: the operation name, its parameters, and the
/// degraded-tier inputs (cache TTL, optional static default).
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    /// Operation name, also used as the named-source lookup key
    pub name: String,
    /// Request parameters, sorted so cache keys are deterministic
    pub params: BTreeMap<String, String>,
    /// Time-to-live for cached successes
    pub cache_ttl: Duration,
    /// Last-resort payload when every other tier is empty
    pub static_default: Option<Value>,
}

impl FallbackRequest {
    /// Create a request for the named operation with default cache TTL
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
            cache_ttl: Duration::from_secs(300),
            static_default: None,
        }
    }

    /// Add a request parameter
    #[must_use]
    pub fn with_param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Override the cache TTL for this request
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Provide a static default payload as the last fallback tier
    #[must_use]
    pub fn with_static_default(mut self, data: Value) -> Self {
        self.static_default = Some(data);
        self
    }

    /// Deterministic cache key for this request.
    ///
    /// Parameters are already sorted by the map; keys that look like
    /// credentials are left out so secrets never reach cache storage. The
    /// separator characters are escaped inside each component, so distinct
    /// parameter sets always derive distinct keys.
    pub fn cache_key(&self) -> String {
        let mut key = escape_key_component(&self.name);
        for (k, v) in &self.params {
            let lowered = k.to_lowercase();
            if SECRET_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                continue;
            }
            key.push(':');
            key.push_str(&escape_key_component(k));
            key.push('=');
            key.push_str(&escape_key_component(v));
        }
        key
    }
}

/// Runs operations through a circuit breaker and walks the fallback tiers on
/// failure.
///
/// The resolver holds the breaker but never calls into the cache or sources
/// while the breaker's lock is held; breaker bookkeeping is finished before
/// any tier I/O starts.
pub struct FallbackResolver<C: Clock = SystemClock> {
    breaker: Arc<CircuitBreaker<C>>,
    cache: Option<Arc<dyn FallbackCache>>,
    sources: HashMap<String, Arc<dyn NamedSource>>,
}

impl<C: Clock> FallbackResolver<C> {
    /// Create a resolver around an existing breaker, with no degraded tiers
    pub fn new(breaker: Arc<CircuitBreaker<C>>) -> Self {
        Self { breaker, cache: None, sources: HashMap::new() }
    }

    /// Attach a cache backend for the cache tier
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn FallbackCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register a named source for an operation name
    #[must_use]
    pub fn register_source<S: Into<String>>(
        mut self,
        operation: S,
        source: Arc<dyn NamedSource>,
    ) -> Self {
        self.sources.insert(operation.into(), source);
        self
    }

    /// The breaker this resolver consults
    pub fn breaker(&self) -> &Arc<CircuitBreaker<C>> {
        &self.breaker
    }

    /// Run the operation through the breaker, falling back through the tiers
    /// on rejection or failure.
    ///
    /// The original error is returned untouched when no tier resolves; a
    /// rejected call with no fallback surfaces
    /// [`ResilienceError::CircuitOpen`] with a retry hint.
    pub async fn invoke<F, Fut, E>(
        &self,
        request: &FallbackRequest,
        operation: F,
    ) -> ResilienceResult<FallbackResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.breaker.can_execute() {
            debug!(operation = %request.name, "Circuit open, attempting fallback");
            if let Some(result) = self.resolve_fallback(request, "circuit open").await {
                return Ok(result);
            }
            return Err(ResilienceError::CircuitOpen {
                service: self.breaker.name().to_string(),
                retry_after: self.breaker.retry_after(),
            });
        }

        match operation().await {
            Ok(data) => {
                self.breaker.record_success();
                self.store(request, &data).await;
                Ok(FallbackResult::api(&request.name, data))
            }
            Err(err) => {
                self.breaker.record_failure();
                let reason = err.to_string();
                info!(operation = %request.name, error = %reason, "Primary failed, attempting fallback");
                if let Some(result) = self.resolve_fallback(request, &reason).await {
                    return Ok(result);
                }
                Err(ResilienceError::OperationFailed { source: err })
            }
        }
    }

    /// Best-effort write-through of a fresh success. Cache errors are logged
    /// and swallowed; they never fail the call.
    async fn store(&self, request: &FallbackRequest, data: &Value) {
        let Some(cache) = &self.cache else { return };
        if let Err(err) = cache.put(&request.cache_key(), data, request.cache_ttl).await {
            warn!(operation = %request.name, error = %err, "Failed to cache successful result");
        }
    }

    /// Walk the degraded tiers in order, returning the first hit.
    async fn resolve_fallback(
        &self,
        request: &FallbackRequest,
        reason: &str,
    ) -> Option<FallbackResult> {
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&request.cache_key()).await {
                debug!(
                    operation = %request.name,
                    age_secs = entry.age.as_secs(),
                    stale = entry.stale,
                    "Serving from cache tier"
                );
                let mut result = FallbackResult::from_cache(
                    &request.name,
                    entry.data,
                    entry.age,
                    reason.to_string(),
                );
                if entry.stale {
                    result = result.with_metadata("cache_state", "stale");
                }
                return Some(result);
            }
        }

        if let Some(source) = self.sources.get(&request.name) {
            if let Some(data) = source.resolve(&request.name, &request.params).await {
                debug!(operation = %request.name, "Serving from named source tier");
                return Some(FallbackResult::from_named_source(
                    &request.name,
                    data,
                    reason.to_string(),
                ));
            }
        }

        if let Some(data) = &request.static_default {
            debug!(operation = %request.name, "Serving static default tier");
            return Some(FallbackResult::from_static(
                &request.name,
                data.clone(),
                reason.to_string(),
            ));
        }

        None
    }
}

impl<C: Clock> std::fmt::Debug for FallbackResolver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackResolver")
            .field("breaker", &self.breaker.name())
            .field("has_cache", &self.cache.is_some())
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}
