//! Outrigger core: transport-agnostic resilience engine
//!
//! Policies (retry, circuit breaker, timeout, fallback, bulkhead) wrap
//! fallible operations and compose into strictly nested pipelines. This
//! crate knows nothing about HTTP; the `outrigger-http` crate layers the
//! handler chain (authorization, request timeouts, correlation propagation)
//! on top of it.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use outrigger_core::error::PipelineError;
//! use outrigger_core::policy::{PolicyDescriptor, PolicyExecutor, PolicyRegistry, RetryConfig};
//!
//! # async fn demo() -> Result<(), PipelineError> {
//! let registry = Arc::new(PolicyRegistry::new());
//! registry.register(
//!     "upstream-retry",
//!     &PolicyDescriptor::Retry(RetryConfig::builder().max_attempts(4).build()?),
//! )?;
//!
//! let executor = PolicyExecutor::new(registry);
//! let value = executor
//!     .run(&["upstream-retry"], || async { Ok::<_, PipelineError>(42) })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod correlation;
pub mod error;
pub mod metrics;
pub mod policy;

pub use clock::{Clock, SystemClock};
pub use config::{ConfigHandle, PipelineConfig, PipelineSettings};
pub use correlation::{CorrelationContext, CorrelationScope, DEFAULT_CORRELATION_HEADER};
pub use error::{PipelineError, PipelineResult};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use policy::{
    CompositePolicy, PolicyDescriptor, PolicyExecutor, PolicyInstance, PolicyKind, PolicyRegistry,
};
