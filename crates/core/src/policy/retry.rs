//! Retry policy with configurable backoff and jitter
//!
//! Re-invokes a failed operation up to a fixed attempt budget. Delays
//! between attempts follow the configured backoff strategy, optionally
//! randomized to avoid thundering herds. A caller cancellation is never
//! retried, regardless of classifier: the loop stops the moment it sees
//! [`PipelineError::Cancelled`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use super::invalid_config;
use crate::error::{PipelineError, PipelineResult};

/// Backoff strategy for calculating delays between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay: Duration },
    /// Exponential backoff: `initial_delay * base^retry`, capped at
    /// `max_delay`
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Delay before the given retry (0 = delay after the first failure)
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { initial_delay, base, max_delay } => {
                let raw = initial_delay.as_millis() as f64 * base.powi(retry as i32);
                let capped = raw.min(max_delay.as_millis() as f64) as u64;
                Duration::from_millis(capped)
            }
        }
    }
}

/// Jitter applied on top of the calculated backoff delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Use the calculated delay as-is
    None,
    /// Random delay in `[0, calculated]`
    Full,
    /// Random delay in `[calculated/2, calculated]`
    Equal,
}

impl Jitter {
    /// Apply this jitter to a calculated delay
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rng.gen_range(0..=millis)),
            Self::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rng.gen_range(0..=millis - half))
            }
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempt budget (initial try + retries)
    pub max_attempts: u32,
    /// Backoff strategy for delays between attempts
    pub backoff: BackoffStrategy,
    /// Jitter applied to each delay
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(100),
                base: 2.0,
                max_delay: Duration::from_secs(30),
            },
            jitter: Jitter::None,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.max_attempts == 0 {
            return Err(invalid_config("max_attempts must be greater than 0"));
        }
        if let BackoffStrategy::Exponential { base, .. } = &self.backoff {
            if *base < 1.0 {
                return Err(invalid_config("exponential backoff base must be >= 1.0"));
            }
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed { delay };
        self
    }

    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        base: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, base, max_delay };
        self
    }

    pub fn full_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Full;
        self
    }

    pub fn equal_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Equal;
        self
    }

    pub fn build(self) -> PipelineResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Decides whether a particular error is worth another attempt
pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, error: &PipelineError, attempt: u32) -> bool;
}

/// Retry only errors classified as retryable by the taxonomy
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryableOnly;

impl RetryClassifier for RetryableOnly {
    fn should_retry(&self, error: &PipelineError, _attempt: u32) -> bool {
        error.is_retryable()
    }
}

/// Retry every failure (cancellation still stops the loop)
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl RetryClassifier for AlwaysRetry {
    fn should_retry(&self, _error: &PipelineError, _attempt: u32) -> bool {
        true
    }
}

/// Executable retry policy
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    classifier: Arc<dyn RetryClassifier>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy").field("config", &self.config).finish()
    }
}

impl RetryPolicy {
    /// Create a retry policy retrying only retryable errors
    pub fn new(config: RetryConfig) -> Self {
        Self { config, classifier: Arc::new(RetryableOnly) }
    }

    /// Create a retry policy with a custom classifier
    pub fn with_classifier(config: RetryConfig, classifier: Arc<dyn RetryClassifier>) -> Self {
        Self { config, classifier }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run an operation, re-invoking it on retryable failure until the
    /// attempt budget is consumed
    pub async fn execute<T, F, Fut>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = PipelineResult<T>> + Send,
        T: Send,
    {
        let mut last_error: Option<PipelineError> = None;

        for attempt in 1..=self.config.max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_cancellation() => return Err(error),
                Err(error) => {
                    if !self.classifier.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    warn!(attempt, error = %error, "attempt failed");
                    if attempt < self.config.max_attempts {
                        let delay =
                            self.config.jitter.apply(self.config.backoff.delay_for(attempt - 1));
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(PipelineError::RetryExhausted {
            attempts: self.config.max_attempts,
            last_error: last_error.map(|e| e.to_string()),
        })
    }

    /// Synchronous counterpart of [`RetryPolicy::execute`]
    ///
    /// Blocks the calling thread during backoff; never call this from an
    /// async context.
    pub fn call<T, F>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> PipelineResult<T>,
    {
        let mut last_error: Option<PipelineError> = None;

        for attempt in 1..=self.config.max_attempts {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_cancellation() => return Err(error),
                Err(error) => {
                    if !self.classifier.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    if attempt < self.config.max_attempts {
                        let delay =
                            self.config.jitter.apply(self.config.backoff.delay_for(attempt - 1));
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(PipelineError::RetryExhausted {
            attempts: self.config.max_attempts,
            last_error: last_error.map(|e| e.to_string()),
        })
    }
}
