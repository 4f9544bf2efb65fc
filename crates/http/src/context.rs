//! Per-operation request context
//!
//! One [`RequestContext`] spans one logical operation: the caller's
//! cancellation signal plus the correlation scope shared by every request
//! the operation issues. Handlers receive it by reference and clone it when
//! spawning logical children; unrelated operations hold unrelated contexts.

use tokio_util::sync::CancellationToken;

use outrigger_core::correlation::CorrelationScope;

/// Cancellation signal and correlation scope for one logical operation
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancellation: CancellationToken,
    correlation: CorrelationScope,
}

impl RequestContext {
    /// Fresh context: no cancellation armed, empty correlation scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Context driven by the caller's own cancellation token
    pub fn with_caller_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation, correlation: CorrelationScope::new() }
    }

    /// The cancellation token for this operation
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The correlation scope shared across this operation's requests
    pub fn correlation(&self) -> &CorrelationScope {
        &self.correlation
    }

    /// Same logical operation, narrower cancellation signal
    ///
    /// Used by handlers that impose their own bound: the derived token is a
    /// child of the caller's (caller cancellation still propagates), while
    /// the correlation scope is shared unchanged.
    pub fn with_derived_cancellation(&self, cancellation: CancellationToken) -> Self {
        Self { cancellation, correlation: self.correlation.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_correlation_scope() {
        let ctx = RequestContext::new();
        let child = ctx.clone();

        let id = ctx.correlation().get_or_generate().to_string();
        assert_eq!(child.correlation().get(), Some(id.as_str()));
    }

    #[test]
    fn derived_cancellation_keeps_the_scope() {
        let caller = CancellationToken::new();
        let ctx = RequestContext::with_caller_cancellation(caller.clone());
        let id = ctx.correlation().get_or_generate().to_string();

        let derived = ctx.with_derived_cancellation(caller.child_token());
        assert_eq!(derived.correlation().get(), Some(id.as_str()));

        // Caller cancellation propagates into the derived token.
        caller.cancel();
        assert!(derived.cancellation().is_cancelled());
    }

    #[test]
    fn independent_contexts_are_unrelated() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.correlation().get_or_generate(), b.correlation().get_or_generate());

        a.cancellation().cancel();
        assert!(!b.cancellation().is_cancelled());
    }
}
