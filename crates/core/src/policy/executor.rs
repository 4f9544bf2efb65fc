//! Policy composition and execution
//!
//! [`CompositePolicy`] collapses an ordered list of policies into one
//! executable unit. Layers nest strictly: index 0 is the outermost wrapper,
//! so its handling encloses everything inside — a circuit breaker outside a
//! retry sees one failure per exhausted retry group and, once open, rejects
//! before the retry loop even starts. An empty composition is a pass-through.
//!
//! Operations are supplied as re-invocable closures (`Fn`, not `FnOnce`)
//! because inner layers may call them any number of times.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture as SendBoxFuture;
use tracing::instrument;

use super::bulkhead::BulkheadPolicy;
use super::circuit_breaker::CircuitBreakerPolicy;
use super::fallback::FallbackPolicy;
use super::registry::PolicyRegistry;
use super::retry::RetryPolicy;
use super::timeout::TimeoutPolicy;
use super::PolicyKind;
use crate::error::PipelineResult;

/// Boxed future produced by pipeline operations
pub type BoxFuture<T> = SendBoxFuture<'static, PipelineResult<T>>;

/// A re-invocable asynchronous operation
pub type SharedOperation<T> = Arc<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// A re-invocable synchronous operation
pub type SharedSyncOperation<T> = Arc<dyn Fn() -> PipelineResult<T> + Send + Sync>;

/// One realized, executable policy
///
/// Variants are the five composable wrappers; each delegates to its concrete
/// policy type, which owns all behavior and state.
#[derive(Debug, Clone)]
pub enum PolicyInstance {
    Retry(RetryPolicy),
    CircuitBreaker(CircuitBreakerPolicy),
    Timeout(TimeoutPolicy),
    Fallback(FallbackPolicy),
    Bulkhead(BulkheadPolicy),
}

impl PolicyInstance {
    /// The kind of behavior this instance implements
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Retry(_) => PolicyKind::Retry,
            Self::CircuitBreaker(_) => PolicyKind::CircuitBreaker,
            Self::Timeout(_) => PolicyKind::Timeout,
            Self::Fallback(_) => PolicyKind::Fallback,
            Self::Bulkhead(_) => PolicyKind::Bulkhead,
        }
    }

    /// Attempt an operation under this policy's handling
    pub async fn attempt<T>(&self, operation: SharedOperation<T>) -> PipelineResult<T>
    where
        T: Send + 'static,
    {
        match self {
            Self::Retry(policy) => policy.execute(move || operation()).await,
            Self::CircuitBreaker(policy) => policy.execute(move || operation()).await,
            Self::Timeout(policy) => policy.execute(move || operation()).await,
            Self::Fallback(policy) => policy.execute(move || operation()).await,
            Self::Bulkhead(policy) => policy.execute(move || operation()).await,
        }
    }

    /// Synchronous counterpart of [`PolicyInstance::attempt`]
    pub fn attempt_sync<T>(&self, operation: SharedSyncOperation<T>) -> PipelineResult<T>
    where
        T: Send + 'static,
    {
        match self {
            Self::Retry(policy) => policy.call(move || operation()),
            Self::CircuitBreaker(policy) => policy.call(move || operation()),
            Self::Timeout(policy) => policy.call(move || operation()),
            Self::Fallback(policy) => policy.call(move || operation()),
            Self::Bulkhead(policy) => policy.call(move || operation()),
        }
    }
}

/// An ordered nesting of policies executed as one unit
///
/// Construction is pure: composing the same ordered names twice yields
/// functionally equivalent composites, with stateful instances (breakers,
/// bulkheads) shared via `Arc` so every composite guarding a target observes
/// the same breaker state.
#[derive(Debug, Clone, Default)]
pub struct CompositePolicy {
    layers: Arc<[Arc<PolicyInstance>]>,
}

impl CompositePolicy {
    /// Build a composite from outermost-first policy instances
    pub fn new(layers: Vec<Arc<PolicyInstance>>) -> Self {
        Self { layers: layers.into() }
    }

    /// A composite with no layers: executes the operation directly
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Number of layers in this composite
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Kinds of the layers, outermost first
    pub fn kinds(&self) -> Vec<PolicyKind> {
        self.layers.iter().map(|layer| layer.kind()).collect()
    }

    /// Run an operation through every layer, outermost first
    #[instrument(skip_all, fields(layers = self.layers.len()))]
    pub async fn execute<T, F, Fut>(&self, operation: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<T>> + Send + 'static,
    {
        let operation: SharedOperation<T> =
            Arc::new(move || Box::pin(operation()) as BoxFuture<T>);
        Self::run_layer(Arc::clone(&self.layers), 0, operation).await
    }

    fn run_layer<T>(
        layers: Arc<[Arc<PolicyInstance>]>,
        index: usize,
        operation: SharedOperation<T>,
    ) -> BoxFuture<T>
    where
        T: Send + 'static,
    {
        Box::pin(async move {
            match layers.get(index) {
                None => operation().await,
                Some(layer) => {
                    let layer = Arc::clone(layer);
                    let inner: SharedOperation<T> = {
                        let layers = Arc::clone(&layers);
                        Arc::new(move || {
                            Self::run_layer(Arc::clone(&layers), index + 1, Arc::clone(&operation))
                        })
                    };
                    layer.attempt(inner).await
                }
            }
        })
    }

    /// Synchronous counterpart of [`CompositePolicy::execute`] with
    /// identical composition semantics
    pub fn execute_sync<T, F>(&self, operation: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: Fn() -> PipelineResult<T> + Send + Sync + 'static,
    {
        let operation: SharedSyncOperation<T> = Arc::new(operation);
        Self::run_layer_sync(&self.layers, 0, operation)
    }

    fn run_layer_sync<T>(
        layers: &Arc<[Arc<PolicyInstance>]>,
        index: usize,
        operation: SharedSyncOperation<T>,
    ) -> PipelineResult<T>
    where
        T: Send + 'static,
    {
        match layers.get(index) {
            None => operation(),
            Some(layer) => {
                let inner: SharedSyncOperation<T> = {
                    let layers = Arc::clone(layers);
                    Arc::new(move || {
                        Self::run_layer_sync(&layers, index + 1, Arc::clone(&operation))
                    })
                };
                layer.attempt_sync(inner)
            }
        }
    }
}

/// Resolves named policies and runs operations through them
///
/// Thin façade over a shared [`PolicyRegistry`]: `run` composes on the fly,
/// `execute` reuses a prebuilt composite.
#[derive(Debug, Clone)]
pub struct PolicyExecutor {
    registry: Arc<PolicyRegistry>,
}

impl PolicyExecutor {
    /// Create an executor over a shared registry
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self { registry }
    }

    /// The registry backing this executor
    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    /// Compose the named policies, outermost first
    pub fn compose<S: AsRef<str>>(&self, names: &[S]) -> PipelineResult<CompositePolicy> {
        self.registry.compose(names)
    }

    /// Compose and run in one step
    pub async fn run<T, F, Fut, S>(&self, names: &[S], operation: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<T>> + Send + 'static,
        S: AsRef<str>,
    {
        self.compose(names)?.execute(operation).await
    }

    /// Synchronous counterpart of [`PolicyExecutor::run`]
    pub fn run_sync<T, F, S>(&self, names: &[S], operation: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: Fn() -> PipelineResult<T> + Send + Sync + 'static,
        S: AsRef<str>,
    {
        self.compose(names)?.execute_sync(operation)
    }
}
