//! Resilience policies: composable wrappers around fallible operations
//!
//! Each policy is an independent wrapper implementing one behavior (retry,
//! circuit breaking, timeout, fallback, bulkhead). Policies are realized
//! from immutable [`PolicyDescriptor`]s, stored by name in a
//! [`PolicyRegistry`], and collapsed into a [`CompositePolicy`] whose layers
//! nest strictly: the first name in a composition is the outermost wrapper,
//! so a circuit breaker placed outside a retry short-circuits the whole
//! retry group while the breaker is open.
//!
//! Both asynchronous and synchronous execution paths exist with identical
//! composition semantics; the async path never blocks the calling task
//! except at genuine suspension points (backoff sleeps, semaphore waits).

pub mod bulkhead;
pub mod circuit_breaker;
pub mod executor;
pub mod fallback;
pub mod registry;
pub mod retry;
pub mod timeout;

use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};

pub use bulkhead::{BulkheadConfig, BulkheadMetrics, BulkheadPolicy};
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerPolicy, CircuitState,
};
pub use executor::{
    BoxFuture, CompositePolicy, PolicyExecutor, PolicyInstance, SharedOperation,
    SharedSyncOperation,
};
pub use fallback::{FallbackConfig, FallbackPolicy};
pub use registry::PolicyRegistry;
pub use retry::{AlwaysRetry, BackoffStrategy, Jitter, RetryClassifier, RetryConfig, RetryPolicy, RetryableOnly};
pub use timeout::{TimeoutConfig, TimeoutPolicy};

/// The kind of behavior a policy implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Retry,
    CircuitBreaker,
    Timeout,
    Fallback,
    Bulkhead,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Retry => "retry",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Timeout => "timeout",
            Self::Fallback => "fallback",
            Self::Bulkhead => "bulkhead",
        };
        write!(f, "{name}")
    }
}

/// Immutable, typed policy configuration
///
/// A descriptor is pure data: realizing it produces an executable
/// [`PolicyInstance`] after validating the kind-specific options. Once
/// registered under a name the descriptor is never mutated.
#[derive(Debug, Clone)]
pub enum PolicyDescriptor {
    Retry(RetryConfig),
    CircuitBreaker(CircuitBreakerConfig),
    Timeout(TimeoutConfig),
    Fallback(FallbackConfig),
    Bulkhead(BulkheadConfig),
}

impl PolicyDescriptor {
    /// The kind of policy this descriptor configures
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Retry(_) => PolicyKind::Retry,
            Self::CircuitBreaker(_) => PolicyKind::CircuitBreaker,
            Self::Timeout(_) => PolicyKind::Timeout,
            Self::Fallback(_) => PolicyKind::Fallback,
            Self::Bulkhead(_) => PolicyKind::Bulkhead,
        }
    }

    /// Validate the options and produce an executable policy instance
    pub fn realize(&self) -> PipelineResult<PolicyInstance> {
        match self {
            Self::Retry(config) => {
                config.validate()?;
                Ok(PolicyInstance::Retry(RetryPolicy::new(config.clone())))
            }
            Self::CircuitBreaker(config) => {
                config.validate()?;
                Ok(PolicyInstance::CircuitBreaker(CircuitBreakerPolicy::new(config.clone())))
            }
            Self::Timeout(config) => {
                config.validate()?;
                Ok(PolicyInstance::Timeout(TimeoutPolicy::new(config.clone())))
            }
            Self::Fallback(config) => {
                Ok(PolicyInstance::Fallback(FallbackPolicy::from_config(config.clone())))
            }
            Self::Bulkhead(config) => {
                config.validate()?;
                Ok(PolicyInstance::Bulkhead(BulkheadPolicy::new(config.clone())))
            }
        }
    }
}

pub(crate) fn invalid_config(message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfiguration { message: message.into() }
}
