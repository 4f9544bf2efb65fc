//! Handler chain composition
//!
//! A chain is a fixed-order nesting of interceptors ending in the
//! transport: authorization → timeout → correlation → transport. Each link
//! holds its successor and may short-circuit (return without delegating) or
//! delegate more than once (retry). Construction is static per client
//! configuration; nothing is reordered at request time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use outrigger_core::config::PipelineSettings;
use outrigger_core::error::PipelineResult;
use outrigger_core::metrics::PipelineMetrics;

use crate::auth::{AuthorizationConfig, AuthorizationHandler, TokenSource};
use crate::context::RequestContext;
use crate::correlation::CorrelationPropagator;
use crate::message::{Request, Response};
use crate::timeout::TimeoutHandler;
use crate::transport::Transport;

/// One link in the chain
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process a request, usually by mutating it and delegating onward
    async fn handle(&self, request: Request, ctx: &RequestContext) -> PipelineResult<Response>;
}

/// Instrumentation points invoked by the terminal link
///
/// Hooks are called directly at well-defined points rather than published
/// onto any event bus; implementations must be cheap and must not fail.
pub trait ChainHooks: Send + Sync {
    /// Called immediately before the transport dispatches a request
    fn before_send(&self, request: &Request, ctx: &RequestContext) {
        let _ = (request, ctx);
    }

    /// Called immediately after the transport produced an outcome
    fn after_receive(
        &self,
        request: &Request,
        outcome: &PipelineResult<Response>,
        ctx: &RequestContext,
    ) {
        let _ = (request, outcome, ctx);
    }
}

/// Terminal link: hooks plus the transport itself
struct TransportLink {
    transport: Arc<dyn Transport>,
    hooks: Vec<Arc<dyn ChainHooks>>,
}

#[async_trait]
impl Handler for TransportLink {
    async fn handle(&self, request: Request, ctx: &RequestContext) -> PipelineResult<Response> {
        for hook in &self.hooks {
            hook.before_send(&request, ctx);
        }
        let outcome = self.transport.dispatch(request.clone(), ctx).await;
        for hook in &self.hooks {
            hook.after_receive(&request, &outcome, ctx);
        }
        outcome
    }
}

/// Ordered interceptor composition over one transport
#[derive(Clone)]
pub struct HandlerChain {
    head: Arc<dyn Handler>,
    metrics: Arc<PipelineMetrics>,
}

impl HandlerChain {
    pub fn builder(transport: Arc<dyn Transport>) -> HandlerChainBuilder {
        HandlerChainBuilder::new(transport)
    }

    /// Send a request through every configured link
    pub async fn send(&self, request: Request, ctx: &RequestContext) -> PipelineResult<Response> {
        self.metrics.record_request();
        let outcome = self.head.handle(request, ctx).await;
        if let Err(error) = &outcome {
            debug!(error = %error, "request failed in handler chain");
            self.metrics.record_failure();
        }
        outcome
    }

    /// Metrics shared by every link in this chain
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }
}

/// Builder for [`HandlerChain`]
///
/// Links are optional; enabled links always assemble in the fixed order
/// authorization → timeout → correlation → transport.
pub struct HandlerChainBuilder {
    transport: Arc<dyn Transport>,
    hooks: Vec<Arc<dyn ChainHooks>>,
    authorization: Option<(AuthorizationConfig, TokenSource)>,
    timeout: Option<watch::Receiver<PipelineSettings>>,
    correlation: Option<watch::Receiver<PipelineSettings>>,
    metrics: Arc<PipelineMetrics>,
}

impl HandlerChainBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            hooks: Vec::new(),
            authorization: None,
            timeout: None,
            correlation: None,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Enable the authorization link
    pub fn authorization(mut self, config: AuthorizationConfig, source: TokenSource) -> Self {
        self.authorization = Some((config, source));
        self
    }

    /// Enable the timeout link, sampling settings per request
    pub fn timeout(mut self, settings: watch::Receiver<PipelineSettings>) -> Self {
        self.timeout = Some(settings);
        self
    }

    /// Enable the correlation link, sampling settings per request
    pub fn correlation(mut self, settings: watch::Receiver<PipelineSettings>) -> Self {
        self.correlation = Some(settings);
        self
    }

    /// Register an instrumentation hook on the terminal link
    pub fn hook(mut self, hook: Arc<dyn ChainHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Use an externally owned metrics collector
    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> HandlerChain {
        // Assemble innermost first.
        let mut head: Arc<dyn Handler> =
            Arc::new(TransportLink { transport: self.transport, hooks: self.hooks });

        if let Some(settings) = self.correlation {
            head = Arc::new(CorrelationPropagator::new(head, settings));
        }
        if let Some(settings) = self.timeout {
            head = Arc::new(TimeoutHandler::new(head, settings, Arc::clone(&self.metrics)));
        }
        if let Some((config, source)) = self.authorization {
            head = Arc::new(AuthorizationHandler::new(
                head,
                config,
                source,
                Arc::clone(&self.metrics),
            ));
        }

        HandlerChain { head, metrics: self.metrics }
    }
}
