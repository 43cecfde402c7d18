//! Resilience layer for services that call unreliable dependencies.
//!
//! Three concerns, composable but independently usable:
//!
//! - **Circuit breaking** ([`breaker`]): a per-dependency state machine that
//!   sheds load when a dependency is failing, probes it after a timeout, and
//!   closes again once it recovers. A registry keeps one breaker per
//!   dependency name so every caller shares the same view.
//! - **Tiered fallback** ([`fallback`]): when the primary operation is
//!   rejected or fails, degrade through cache, a named secondary source, and
//!   a static default before surfacing the original error. Every result is
//!   labelled with its tier and confidence.
//! - **Graceful shutdown** ([`shutdown`]): track in-flight work, refuse new
//!   admissions once shutdown starts, and drain with a bounded wait.
//!
//! [`ResilienceLayer`] assembles all three behind one handle per dependency.
//! There is no global state anywhere in this crate; construct a layer and
//! pass it to whatever needs it.
//!
//! # Example
//!
//! ```
//! use parapet_resilience::{FallbackRequest, ResilienceLayer};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let layer = ResilienceLayer::new();
//! let quotes = layer.wrap("quote-service");
//!
//! let request = FallbackRequest::new("quote-service")
//!     .with_param("symbol", "ACME")
//!     .with_static_default(json!({ "price": null }));
//!
//! let result = quotes
//!     .call("req-1", &request, || async {
//!         Ok::<_, std::io::Error>(json!({ "price": 42.0 }))
//!     })
//!     .await
//!     .unwrap();
//! assert!(!result.is_fallback());
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod breaker;
pub mod error;
pub mod fallback;
pub mod guard;
pub mod shutdown;
pub mod testing;
pub mod time;

// Re-export commonly used types for convenience
// ------------------------------------------------
pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitBreakerSnapshot, CircuitState, HealthReport, HealthStatus,
};
pub use error::{
    BoxedError, ConfigError, ConfigResult, ErrorCategory, ErrorClassification, ErrorSeverity,
    ResilienceError, ResilienceResult,
};
pub use fallback::{
    CachedEntry, Confidence, FallbackCache, FallbackRequest, FallbackResolver, FallbackResult,
    FallbackSource, NamedSource,
};
pub use guard::{Guarded, ResilienceLayer};
pub use shutdown::{
    AdmissionGuard, DrainReport, ShutdownConfig, ShutdownCoordinator, ShutdownRejection,
    ShutdownStatus,
};
pub use time::{Clock, MockClock, SystemClock};
