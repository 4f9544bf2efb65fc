//! Correlation propagator: consistent identifiers per logical operation
//!
//! Resolution order for the outbound header: an id already present on the
//! request wins (and seeds the operation's scope so later requests agree),
//! then an id already in the scope, then a freshly generated one. When
//! configured, the value actually sent is echoed onto the response.
//!
//! Correlation is a best-effort observability aid: this link never fails a
//! request. It delegates exactly once and passes transport outcomes through
//! untouched.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use outrigger_core::config::PipelineSettings;
use outrigger_core::correlation::CorrelationContext;
use outrigger_core::error::PipelineResult;

use crate::context::RequestContext;
use crate::handler::Handler;
use crate::message::{Request, Response};

/// Outbound interceptor attaching the correlation header
pub struct CorrelationPropagator {
    next: Arc<dyn Handler>,
    settings: watch::Receiver<PipelineSettings>,
}

impl CorrelationPropagator {
    pub fn new(next: Arc<dyn Handler>, settings: watch::Receiver<PipelineSettings>) -> Self {
        Self { next, settings }
    }

    /// Determine the id for this request and make sure the header carries it
    fn resolve(
        &self,
        request: &mut Request,
        ctx: &RequestContext,
        header: String,
    ) -> CorrelationContext {
        if let Some(existing) = request.header(&header) {
            let existing = existing.to_string();
            // Seed the scope so sibling requests of this operation agree;
            // if the scope already has an id, the request's explicit header
            // still wins for this request.
            if !ctx.correlation().try_seed(existing.clone()) {
                debug!("request header overrides the scope id for this request");
            }
            return CorrelationContext::with_header(existing, header);
        }

        let id = ctx.correlation().get_or_generate().to_string();
        request.set_header(header.clone(), id.clone());
        CorrelationContext::with_header(id, header)
    }
}

#[async_trait]
impl Handler for CorrelationPropagator {
    async fn handle(&self, mut request: Request, ctx: &RequestContext) -> PipelineResult<Response> {
        let (header, echo) = {
            let settings = self.settings.borrow();
            (settings.correlation_header.clone(), settings.echo_correlation)
        };

        let correlation = self.resolve(&mut request, ctx, header);
        debug!(correlation_id = %correlation.id, "outbound request correlated");

        let outcome = self.next.handle(request, ctx).await;

        match outcome {
            Ok(mut response) if echo => {
                // Echo the value that was actually sent, never a fresh one.
                response.set_header(correlation.header_name, correlation.id);
                Ok(response)
            }
            other => other,
        }
    }
}
