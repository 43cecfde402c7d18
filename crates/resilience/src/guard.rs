//! Composition of breaker, fallback, and admission control
//!
//! [`ResilienceLayer`] is the assembled stack an application constructs once
//! and shares: a breaker registry, a shutdown coordinator, and the fallback
//! collaborators. [`ResilienceLayer::wrap`] produces a [`Guarded`] handle for
//! one dependency; its [`Guarded::call`] runs the full pipeline per request:
//!
//! ```text
//! admission check → circuit check → operation → fallback tiers → release
//! ```
//!
//! There is no global instance. Anything that needs the layer receives it
//! explicitly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, HealthReport,
};
use crate::error::{ConfigResult, ResilienceError, ResilienceResult};
use crate::fallback::{FallbackCache, FallbackRequest, FallbackResolver, FallbackResult, NamedSource};
use crate::shutdown::{
    AdmissionGuard, DrainReport, ShutdownConfig, ShutdownCoordinator, ShutdownStatus,
};
use crate::time::{Clock, SystemClock};

/// The assembled resilience stack for an application.
///
/// Construct once, share via clone or `Arc`. All handles wrapped from the
/// same layer share the breaker registry and shutdown coordinator, so a
/// dependency's health is visible to every caller.
pub struct ResilienceLayer<C: Clock + Clone = SystemClock> {
    registry: Arc<CircuitBreakerRegistry<C>>,
    coordinator: Arc<ShutdownCoordinator>,
    cache: Option<Arc<dyn FallbackCache>>,
    sources: HashMap<String, Arc<dyn NamedSource>>,
}

impl ResilienceLayer<SystemClock> {
    /// Create a layer with default shutdown settings on the system clock
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for ResilienceLayer<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> ResilienceLayer<C> {
    /// Create a layer with a custom clock shared by every breaker
    pub fn with_clock(clock: C) -> Self {
        Self {
            registry: Arc::new(CircuitBreakerRegistry::with_clock(clock)),
            coordinator: Arc::new(ShutdownCoordinator::new()),
            cache: None,
            sources: HashMap::new(),
        }
    }

    /// Replace the shutdown coordinator settings
    #[must_use]
    pub fn with_shutdown_config(mut self, config: ShutdownConfig) -> Self {
        self.coordinator = Arc::new(ShutdownCoordinator::with_config(config));
        self
    }

    /// Attach a cache backend shared by every wrapped dependency
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn FallbackCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register a named fallback source for an operation name
    #[must_use]
    pub fn register_source<S: Into<String>>(
        mut self,
        operation: S,
        source: Arc<dyn NamedSource>,
    ) -> Self {
        self.sources.insert(operation.into(), source);
        self
    }

    /// Wrap a dependency with the default breaker configuration.
    ///
    /// Wrapping the same name twice yields handles sharing one breaker.
    pub fn wrap(&self, name: &str) -> Guarded<C> {
        self.assemble(name, self.registry.get(name))
    }

    /// Wrap a dependency, applying `config` if its breaker does not exist yet
    pub fn wrap_with_config(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Guarded<C>> {
        let breaker = self.registry.get_with_config(name, config)?;
        Ok(self.assemble(name, breaker))
    }

    fn assemble(&self, name: &str, breaker: Arc<CircuitBreaker<C>>) -> Guarded<C> {
        let mut resolver = FallbackResolver::new(breaker);
        if let Some(cache) = &self.cache {
            resolver = resolver.with_cache(Arc::clone(cache));
        }
        for (operation, source) in &self.sources {
            resolver = resolver.register_source(operation.clone(), Arc::clone(source));
        }
        Guarded {
            name: name.to_string(),
            resolver,
            coordinator: Arc::clone(&self.coordinator),
        }
    }

    /// The shared breaker registry
    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry<C>> {
        &self.registry
    }

    /// The shared shutdown coordinator
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    /// Aggregate breaker health, for a health endpoint
    pub fn health(&self) -> HealthReport {
        self.registry.health()
    }

    /// Current shutdown and in-flight status
    pub fn shutdown_status(&self) -> ShutdownStatus {
        self.coordinator.status()
    }

    /// Begin refusing new work; in-flight calls run to completion
    pub fn request_shutdown(&self) {
        self.coordinator.request_shutdown();
    }

    /// Request shutdown and wait for in-flight calls, bounded by `timeout`
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        self.coordinator.drain(timeout).await
    }

    /// Drain using the coordinator's default timeout
    pub async fn drain_default(&self) -> DrainReport {
        self.coordinator.drain_default().await
    }
}

impl<C: Clock + Clone> Clone for ResilienceLayer<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            coordinator: Arc::clone(&self.coordinator),
            cache: self.cache.clone(),
            sources: self.sources.clone(),
        }
    }
}

impl<C: Clock + Clone> std::fmt::Debug for ResilienceLayer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceLayer")
            .field("registry", &self.registry)
            .field("coordinator", &self.coordinator)
            .field("has_cache", &self.cache.is_some())
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A dependency handle carrying the full pipeline for one name.
///
/// Cheap to create; hold one per dependency or wrap on demand.
pub struct Guarded<C: Clock = SystemClock> {
    name: String,
    resolver: FallbackResolver<C>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl<C: Clock> Guarded<C> {
    /// Dependency name this handle guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker behind this handle
    pub fn breaker(&self) -> &Arc<CircuitBreaker<C>> {
        self.resolver.breaker()
    }

    /// Run one guarded call.
    ///
    /// Admission is checked first: during shutdown the call is rejected with
    /// [`ResilienceError::ShutdownInProgress`] before the operation or any
    /// fallback tier runs. The admission is released on every exit path.
    pub async fn call<F, Fut, E>(
        &self,
        request_id: &str,
        request: &FallbackRequest,
        operation: F,
    ) -> ResilienceResult<FallbackResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(_guard) = AdmissionGuard::acquire(&self.coordinator, request_id) else {
            return Err(ResilienceError::ShutdownInProgress {
                retry_after: self.coordinator.config().drain_timeout,
            });
        };
        self.resolver.invoke(request, operation).await
    }
}

impl<C: Clock> std::fmt::Debug for Guarded<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guarded").field("name", &self.name).finish()
    }
}
