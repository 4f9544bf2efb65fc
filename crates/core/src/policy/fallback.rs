//! Fallback policy
//!
//! Substitutes a configured result when the wrapped operation fails. The
//! substitute is produced by a supplier inspecting the error; caller
//! cancellation is never masked by a fallback value — the cancellation
//! surfaces unchanged so cancellation precedence holds through composites.
//!
//! Because composites execute operations of arbitrary result type, the
//! supplier produces a type-erased value which is downcast at runtime. A
//! type mismatch is logged and the original error propagates; a fallback is
//! an availability aid, never a source of new failures.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

type FallbackSupplier =
    Arc<dyn Fn(&PipelineError) -> Option<Box<dyn Any + Send>> + Send + Sync + 'static>;

/// Configuration-surface fallback options: a JSON value substituted for
/// operations whose result type is `serde_json::Value`
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackConfig {
    /// The substitute value
    pub value: serde_json::Value,
}

/// Executable fallback policy
#[derive(Clone)]
pub struct FallbackPolicy {
    supplier: FallbackSupplier,
}

impl std::fmt::Debug for FallbackPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPolicy").finish_non_exhaustive()
    }
}

impl FallbackPolicy {
    /// Create a fallback with a custom supplier
    ///
    /// The supplier sees the error and may decline (return `None`) to let it
    /// propagate.
    pub fn new(supplier: FallbackSupplier) -> Self {
        Self { supplier }
    }

    /// Fallback to a fixed value of the operation's result type
    pub fn value<T>(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::new(Arc::new(move |_| Some(Box::new(value.clone()))))
    }

    /// Fallback realized from the configuration surface: substitutes a JSON
    /// value for operations returning `serde_json::Value`
    pub fn from_config(config: FallbackConfig) -> Self {
        Self::value(config.value)
    }

    /// Run an operation, substituting the fallback on (non-cancellation)
    /// failure
    pub async fn execute<T, F, Fut>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = PipelineResult<T>> + Send,
        T: Send + 'static,
    {
        match operation().await {
            Ok(value) => Ok(value),
            Err(error) if error.is_cancellation() => Err(error),
            Err(error) => self.substitute(error),
        }
    }

    /// Synchronous counterpart of [`FallbackPolicy::execute`]
    pub fn call<T, F>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> PipelineResult<T>,
        T: Send + 'static,
    {
        match operation() {
            Ok(value) => Ok(value),
            Err(error) if error.is_cancellation() => Err(error),
            Err(error) => self.substitute(error),
        }
    }

    fn substitute<T: 'static>(&self, error: PipelineError) -> PipelineResult<T> {
        match (self.supplier)(&error) {
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(value) => {
                    debug!(error = %error, "substituting fallback value");
                    Ok(*value)
                }
                Err(_) => {
                    warn!(
                        error = %error,
                        "fallback value type does not match operation result type"
                    );
                    Err(error)
                }
            },
            None => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn substitutes_on_failure() {
        let policy = FallbackPolicy::value(99_i32);
        let result =
            policy.execute(|| async { Err::<i32, _>(PipelineError::transport("down")) }).await;
        assert_eq!(result.expect("fallback applies"), 99);
    }

    #[tokio::test]
    async fn passes_success_through_untouched() {
        let policy = FallbackPolicy::value(99_i32);
        let result = policy.execute(|| async { Ok::<_, PipelineError>(1) }).await;
        assert_eq!(result.expect("success untouched"), 1);
    }

    #[tokio::test]
    async fn never_masks_cancellation() {
        let policy = FallbackPolicy::value(99_i32);
        let result = policy.execute(|| async { Err::<i32, _>(PipelineError::Cancelled) }).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn type_mismatch_propagates_original_error() {
        // Supplier produces a String, operation yields i32.
        let policy = FallbackPolicy::value("wrong type".to_string());
        let result =
            policy.execute(|| async { Err::<i32, _>(PipelineError::CircuitOpen) }).await;
        assert!(matches!(result, Err(PipelineError::CircuitOpen)));
    }

    #[tokio::test]
    async fn supplier_may_decline() {
        let policy = FallbackPolicy::new(Arc::new(|error| {
            // Only substitute for circuit-open failures.
            matches!(error, PipelineError::CircuitOpen).then(|| Box::new(0_i32) as Box<dyn std::any::Any + Send>)
        }));

        let declined =
            policy.execute(|| async { Err::<i32, _>(PipelineError::transport("down")) }).await;
        assert!(matches!(declined, Err(PipelineError::Transport { .. })));

        let substituted =
            policy.execute(|| async { Err::<i32, _>(PipelineError::CircuitOpen) }).await;
        assert_eq!(substituted.expect("substituted"), 0);
    }

    #[test]
    fn config_driven_fallback_yields_json_value() {
        let policy =
            FallbackPolicy::from_config(FallbackConfig { value: serde_json::json!({"ok": true}) });
        let result = policy
            .call(|| Err::<serde_json::Value, _>(PipelineError::transport("down")))
            .expect("fallback applies");
        assert_eq!(result, serde_json::json!({"ok": true}));
    }
}
