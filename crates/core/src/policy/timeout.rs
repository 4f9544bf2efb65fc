//! Timeout policy
//!
//! Bounds the wall-clock duration of one wrapped operation. This is the
//! policy-level timeout used inside composites; the HTTP handler chain has
//! its own timeout interceptor with cancellation-precedence semantics.

use std::time::{Duration, Instant};

use tracing::debug;

use super::invalid_config;
use crate::error::{PipelineError, PipelineResult};

/// Configuration for the timeout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum wall-clock duration for the wrapped operation
    pub bound: Duration,
}

impl TimeoutConfig {
    pub fn new(bound: Duration) -> Self {
        Self { bound }
    }

    /// Validate the configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.bound.is_zero() {
            return Err(invalid_config("timeout bound must be greater than zero"));
        }
        Ok(())
    }
}

/// Executable timeout policy
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    config: TimeoutConfig,
}

impl TimeoutPolicy {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Run an operation, failing with [`PipelineError::Timeout`] if it does
    /// not complete within the bound
    pub async fn execute<T, F, Fut>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = PipelineResult<T>> + Send,
        T: Send,
    {
        match tokio::time::timeout(self.config.bound, operation()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(bound = ?self.config.bound, "policy timeout elapsed");
                Err(PipelineError::Timeout { bound: self.config.bound })
            }
        }
    }

    /// Synchronous counterpart
    ///
    /// A synchronous operation cannot be preempted, so the check is
    /// post-hoc: the operation runs to completion and its result is replaced
    /// with a timeout error if the bound was exceeded. Composition semantics
    /// (what enclosing policies observe) match the async path.
    pub fn call<T, F>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> PipelineResult<T>,
    {
        let started = Instant::now();
        let result = operation();
        if started.elapsed() > self.config.bound {
            return Err(PipelineError::Timeout { bound: self.config.bound });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_bound() {
        let policy = TimeoutPolicy::new(TimeoutConfig::new(Duration::from_millis(100)));
        let result = policy.execute(|| async { Ok::<_, PipelineError>("fast") }).await;
        assert_eq!(result.expect("fast op"), "fast");
    }

    #[tokio::test]
    async fn slow_operation_times_out_with_bound_recorded() {
        let bound = Duration::from_millis(20);
        let policy = TimeoutPolicy::new(TimeoutConfig::new(bound));

        let result: PipelineResult<()> = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(PipelineError::Timeout { bound: recorded }) => assert_eq!(recorded, bound),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn sync_path_flags_overrun_post_hoc() {
        let policy = TimeoutPolicy::new(TimeoutConfig::new(Duration::from_millis(5)));
        let result: PipelineResult<()> = policy.call(|| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(())
        });
        assert!(matches!(result, Err(PipelineError::Timeout { .. })));
    }

    #[test]
    fn zero_bound_rejected() {
        assert!(TimeoutConfig::new(Duration::ZERO).validate().is_err());
    }
}
