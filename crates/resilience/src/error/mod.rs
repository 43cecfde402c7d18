//! Error taxonomy and resilience error types
//!
//! The taxonomy is a closed set of categories used to label terminal failures
//! at the call boundary. It is consumed, not owned, by the resilience core:
//! the breaker and resolver never inspect categories, but every error they
//! surface carries one so downstream consumers can branch on it uniformly.
//!
//! Two error enums live here:
//!
//! 1. [`ResilienceError`]: what a guarded call surfaces to its caller. It is
//!    generic over the wrapped operation's error type `E` so the original
//!    failure is preserved as a `source` rather than stringified away.
//!
//! 2. [`ConfigError`]: construction-time validation failures for the
//!    immutable config structs.
//!
//! Hook callbacks (on-open/on-half-open/on-close) are a third failure channel:
//! they are caught and logged inside the breaker and never reach either enum.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of error categories labelling terminal failures.
///
/// Each category maps to a stable uppercase code suitable for structured
/// logs and wire responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or out-of-range input
    Validation,
    /// Authentication or authorization failure
    Auth,
    /// Requested resource does not exist
    NotFound,
    /// Request conflicts with current state
    Conflict,
    /// Caller exceeded a quota or rate limit
    RateLimit,
    /// A downstream dependency failed
    ExternalService,
    /// Invariant violation inside this process
    Internal,
    /// Operation exceeded its deadline
    Timeout,
}

impl ErrorCategory {
    /// Stable uppercase code for this category
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Auth => "AUTH_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimit => "RATE_LIMIT_EXCEEDED",
            Self::ExternalService => "EXTERNAL_SERVICE_ERROR",
            Self::Internal => "INTERNAL_ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Whether failures in this category are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ExternalService | Self::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Severity level for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Informational, expected condition
    Info,
    /// Degraded but operational
    Warning,
    /// Failure requiring attention
    Error,
    /// System integrity at risk
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Standard interface for classifying errors by their characteristics.
///
/// Implementing this on an error type gives retry loops, monitoring, and
/// health surfaces a uniform view without downcasting.
pub trait ErrorClassification {
    /// Taxonomy category for this error
    fn category(&self) -> ErrorCategory;

    /// Severity for monitoring and alerting
    fn severity(&self) -> ErrorSeverity;

    /// Can the operation be retried?
    fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Suggested retry delay, if the error carries one
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Configuration validation error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation at construction time
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// What was wrong with the configuration
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Result type for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Boxed error type for collaborator interfaces (cache backends, sources)
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by a guarded call.
///
/// Generic over the wrapped operation's error type `E`: when every fallback
/// tier is exhausted the original failure comes back unmodified as the
/// `source` of [`ResilienceError::OperationFailed`].
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open and no fallback tier resolved
    #[error("Circuit breaker open for '{service}'")]
    CircuitOpen {
        /// Dependency name the open breaker guards
        service: String,
        /// Remaining open time, as a retry hint
        retry_after: Option<Duration>,
    },

    /// Shutdown has been requested; new work is not admitted
    #[error("Shutdown in progress, request rejected")]
    ShutdownInProgress {
        /// How long the caller should wait before retrying elsewhere
        retry_after: Duration,
    },

    /// The operation failed and no fallback tier resolved
    #[error("Operation failed")]
    OperationFailed {
        /// The original failure, preserved as the error source
        #[source]
        source: E,
    },
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn category(&self) -> ErrorCategory {
        match self {
            Self::CircuitOpen { .. } | Self::OperationFailed { .. } => {
                ErrorCategory::ExternalService
            }
            Self::ShutdownInProgress { .. } => ErrorCategory::Conflict,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. } | Self::ShutdownInProgress { .. } => ErrorSeverity::Warning,
            Self::OperationFailed { .. } => ErrorSeverity::Error,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } | Self::ShutdownInProgress { .. } => true,
            Self::OperationFailed { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            Self::ShutdownInProgress { retry_after } => Some(*retry_after),
            Self::OperationFailed { .. } => None,
        }
    }
}

/// Result type for guarded calls
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
