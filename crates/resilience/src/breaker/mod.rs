//! Circuit breaking for external dependencies
//!
//! [`CircuitBreaker`] is the per-dependency state machine; [`CircuitBreakerRegistry`]
//! owns one breaker per dependency name so every caller touching the same
//! dependency shares the same view of its health.

mod circuit;
mod registry;

pub use circuit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitBreakerSnapshot, CircuitState, TransitionHook,
};
pub use registry::{CircuitBreakerRegistry, HealthReport, HealthStatus};
