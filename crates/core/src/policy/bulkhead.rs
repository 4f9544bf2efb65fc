//! Bulkhead policy for bounding concurrent operations
//!
//! Caps the number of operations running at once against one resource.
//! Excess operations queue up to a bounded depth (optionally with an acquire
//! timeout); beyond that they are rejected immediately so a slow downstream
//! cannot absorb every task in the process.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use super::invalid_config;
use crate::error::{PipelineError, PipelineResult};

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed
    pub max_concurrent: usize,
    /// Maximum number of operations waiting for a slot
    pub max_queue: usize,
    /// Optional bound on how long an operation may wait for a slot
    pub acquire_timeout: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10, max_queue: 10, acquire_timeout: Some(Duration::from_secs(5)) }
    }
}

impl BulkheadConfig {
    /// Create a configuration builder
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.max_concurrent == 0 {
            return Err(invalid_config("max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`BulkheadConfig`]
#[derive(Debug, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    pub fn new() -> Self {
        Self { config: BulkheadConfig::default() }
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn max_queue(mut self, max: usize) -> Self {
        self.config.max_queue = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = Some(timeout);
        self
    }

    pub fn no_acquire_timeout(mut self) -> Self {
        self.config.acquire_timeout = None;
        self
    }

    pub fn build(self) -> PipelineResult<BulkheadConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time bulkhead metrics
#[derive(Debug, Clone)]
pub struct BulkheadMetrics {
    pub total_operations: u64,
    pub rejected_operations: u64,
    pub current_concurrent: usize,
    pub current_queued: usize,
    pub max_concurrent: usize,
}

impl BulkheadMetrics {
    /// Current utilization in `[0.0, 1.0]`
    pub fn utilization(&self) -> f64 {
        self.current_concurrent as f64 / self.max_concurrent as f64
    }
}

/// Executable bulkhead
///
/// Clones share the same permit pool, so one bulkhead can guard every caller
/// of a downstream target.
pub struct BulkheadPolicy {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    total_operations: Arc<AtomicU64>,
    rejected_operations: Arc<AtomicU64>,
}

impl BulkheadPolicy {
    /// Create a bulkhead with the given configuration
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: Arc::new(AtomicUsize::new(0)),
            total_operations: Arc::new(AtomicU64::new(0)),
            rejected_operations: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Run an operation once a concurrency slot is available
    pub async fn execute<T, F, Fut>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = PipelineResult<T>> + Send,
        T: Send,
    {
        let _permit = self.acquire_slot().await?;
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        operation().await
    }

    /// Synchronous counterpart: takes a slot if one is free right now,
    /// rejects otherwise (no blocking wait on the sync path)
    pub fn call<T, F>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> PipelineResult<T>,
    {
        match self.semaphore.try_acquire() {
            Ok(_permit) => {
                self.total_operations.fetch_add(1, Ordering::Relaxed);
                operation()
            }
            Err(_) => {
                self.rejected_operations.fetch_add(1, Ordering::Relaxed);
                Err(PipelineError::BulkheadFull { capacity: self.config.max_concurrent })
            }
        }
    }

    async fn acquire_slot(&self) -> PipelineResult<SemaphorePermit<'_>> {
        // Fast path: free slot, no queueing.
        if let Ok(permit) = self.semaphore.try_acquire() {
            return Ok(permit);
        }

        // Queue is bounded; beyond it, reject immediately.
        let queued = self.queued.fetch_add(1, Ordering::AcqRel);
        if queued >= self.config.max_queue {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            self.rejected_operations.fetch_add(1, Ordering::Relaxed);
            debug!(capacity = self.config.max_concurrent, "bulkhead rejecting: queue full");
            return Err(PipelineError::BulkheadFull { capacity: self.config.max_concurrent });
        }

        let acquired = match self.config.acquire_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.semaphore.acquire()).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    self.queued.fetch_sub(1, Ordering::AcqRel);
                    self.rejected_operations.fetch_add(1, Ordering::Relaxed);
                    return Err(PipelineError::Timeout { bound: timeout });
                }
            },
            None => self.semaphore.acquire().await.ok(),
        };

        self.queued.fetch_sub(1, Ordering::AcqRel);
        acquired.ok_or(PipelineError::BulkheadFull { capacity: self.config.max_concurrent })
    }

    /// Number of operations currently holding a slot
    pub fn current_concurrent(&self) -> usize {
        self.config.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Point-in-time metrics
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            total_operations: self.total_operations.load(Ordering::Acquire),
            rejected_operations: self.rejected_operations.load(Ordering::Acquire),
            current_concurrent: self.current_concurrent(),
            current_queued: self.queued.load(Ordering::Acquire),
            max_concurrent: self.config.max_concurrent,
        }
    }
}

impl Clone for BulkheadPolicy {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            semaphore: Arc::clone(&self.semaphore),
            queued: Arc::clone(&self.queued),
            total_operations: Arc::clone(&self.total_operations),
            rejected_operations: Arc::clone(&self.rejected_operations),
        }
    }
}

impl fmt::Debug for BulkheadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkheadPolicy")
            .field("max_concurrent", &self.config.max_concurrent)
            .field("max_queue", &self.config.max_queue)
            .field("current_concurrent", &self.current_concurrent())
            .finish()
    }
}
