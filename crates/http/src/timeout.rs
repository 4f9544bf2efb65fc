//! Timeout handler: per-request bound distinct from caller cancellation
//!
//! The handler derives a cancellation signal that is the union of the
//! caller's token and its own timer, and delegates downward with that
//! signal. After the inner call unwinds, the *caller's* token is consulted:
//! if it fired, the surfaced error is `Cancelled` no matter what the timer
//! did — both signals look like "cancelled" to the transport, so timing
//! order alone cannot tell them apart. Only when the caller did not cancel
//! does an elapsed timer translate into `Timeout` carrying the bound.
//!
//! The bound comes from the request's directive or, absent one, from the
//! live settings sampled at send time; a reload applies to requests issued
//! after it, never to in-flight ones. An unbounded request creates no timer
//! at all.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use outrigger_core::config::PipelineSettings;
use outrigger_core::error::{PipelineError, PipelineResult};
use outrigger_core::metrics::PipelineMetrics;

use crate::context::RequestContext;
use crate::handler::Handler;
use crate::message::{Request, Response, TimeoutDirective};

/// Outbound interceptor bounding the wall-clock duration of each request
pub struct TimeoutHandler {
    next: Arc<dyn Handler>,
    settings: watch::Receiver<PipelineSettings>,
    metrics: Arc<PipelineMetrics>,
}

impl TimeoutHandler {
    pub fn new(
        next: Arc<dyn Handler>,
        settings: watch::Receiver<PipelineSettings>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self { next, settings, metrics }
    }

    fn effective_bound(&self, request: &Request) -> Option<Duration> {
        match request.timeout {
            TimeoutDirective::Bound(bound) => Some(bound),
            TimeoutDirective::Unbounded => None,
            TimeoutDirective::Inherit => self.settings.borrow().default_timeout,
        }
    }

    /// Resolve the caller-cancel vs. timer race after the inner call unwound
    fn resolve_interruption(&self, ctx: &RequestContext, bound: Duration) -> PipelineError {
        if ctx.cancellation().is_cancelled() {
            self.metrics.record_cancellation();
            PipelineError::Cancelled
        } else {
            debug!(bound = ?bound, "request exceeded its bound");
            self.metrics.record_timeout();
            PipelineError::Timeout { bound }
        }
    }
}

#[async_trait]
impl Handler for TimeoutHandler {
    async fn handle(&self, request: Request, ctx: &RequestContext) -> PipelineResult<Response> {
        let Some(bound) = self.effective_bound(&request) else {
            // No bound, no timer: delegate with the caller's own signal.
            return self.next.handle(request, ctx).await;
        };

        let derived = ctx.cancellation().child_token();
        let derived_ctx = ctx.with_derived_cancellation(derived.clone());

        let outcome = tokio::select! {
            result = self.next.handle(request, &derived_ctx) => Some(result),
            () = tokio::time::sleep(bound) => {
                // Tell everything downstream to stop before unwinding.
                derived.cancel();
                None
            }
        };

        match outcome {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) if error.is_cancellation() => {
                Err(self.resolve_interruption(ctx, bound))
            }
            Some(Err(error)) => Err(error),
            None => Err(self.resolve_interruption(ctx, bound)),
        }
    }
}
