//! Typed pipeline client
//!
//! Assembles the two halves of the pipeline: a [`HandlerChain`] for
//! transport-level concerns (credential, bound, correlation) and an
//! optional [`PolicyExecutor`] wrapping whole calls in named resilience
//! policies. The chain is built once per client configuration; policies are
//! selected per call or defaulted for every call.

use std::sync::Arc;

use tracing::instrument;

use outrigger_core::config::ConfigHandle;
use outrigger_core::error::PipelineResult;
use outrigger_core::metrics::PipelineMetrics;
use outrigger_core::policy::{PolicyExecutor, PolicyRegistry};

use crate::auth::{AuthorizationConfig, TokenSource};
use crate::context::RequestContext;
use crate::handler::{ChainHooks, HandlerChain};
use crate::message::{Request, Response};
use crate::transport::{ReqwestTransport, Transport};

/// HTTP client with resilience built in
#[derive(Clone)]
pub struct PipelineClient {
    chain: HandlerChain,
    executor: Option<PolicyExecutor>,
    default_policies: Arc<[String]>,
    config: Arc<ConfigHandle>,
}

impl PipelineClient {
    pub fn builder() -> PipelineClientBuilder {
        PipelineClientBuilder::default()
    }

    /// Send a request as its own logical operation, under the default
    /// policies if any are configured
    pub async fn send(&self, request: Request) -> PipelineResult<Response> {
        let ctx = RequestContext::new();
        self.send_in(request, &ctx).await
    }

    /// Send a request within an existing logical operation
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn send_in(
        &self,
        request: Request,
        ctx: &RequestContext,
    ) -> PipelineResult<Response> {
        let names = Arc::clone(&self.default_policies);
        self.run_through(&names, request, ctx).await
    }

    /// Send a request under an explicit, ordered policy selection
    /// (outermost first), ignoring the default selection
    pub async fn send_with_policies<S: AsRef<str>>(
        &self,
        names: &[S],
        request: Request,
        ctx: &RequestContext,
    ) -> PipelineResult<Response> {
        self.run_through(names, request, ctx).await
    }

    async fn run_through<S: AsRef<str>>(
        &self,
        names: &[S],
        request: Request,
        ctx: &RequestContext,
    ) -> PipelineResult<Response> {
        match &self.executor {
            Some(executor) if !names.is_empty() => {
                let chain = self.chain.clone();
                let ctx = ctx.clone();
                executor
                    .run(names, move || {
                        let chain = chain.clone();
                        let request = request.clone();
                        let ctx = ctx.clone();
                        async move { chain.send(request, &ctx).await }
                    })
                    .await
            }
            _ => self.chain.send(request, ctx).await,
        }
    }

    /// Metrics collected by the handler chain
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        self.chain.metrics()
    }

    /// The live settings handle; updates apply to subsequent requests
    pub fn config(&self) -> &Arc<ConfigHandle> {
        &self.config
    }
}

/// Builder for [`PipelineClient`]
pub struct PipelineClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    config: Option<Arc<ConfigHandle>>,
    authorization: Option<(AuthorizationConfig, TokenSource)>,
    timeouts_enabled: bool,
    correlation_enabled: bool,
    hooks: Vec<Arc<dyn ChainHooks>>,
    registry: Option<Arc<PolicyRegistry>>,
    default_policies: Vec<String>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Default for PipelineClientBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            config: None,
            authorization: None,
            timeouts_enabled: true,
            correlation_enabled: true,
            hooks: Vec::new(),
            registry: None,
            default_policies: Vec::new(),
            metrics: None,
        }
    }
}

impl PipelineClientBuilder {
    /// Use a specific transport instead of the default `reqwest` one
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share a live settings handle (for runtime reload)
    pub fn config(mut self, config: Arc<ConfigHandle>) -> Self {
        self.config = Some(config);
        self
    }

    /// Enable the authorization link
    pub fn authorization(mut self, config: AuthorizationConfig, source: TokenSource) -> Self {
        self.authorization = Some((config, source));
        self
    }

    /// Disable the timeout link entirely
    pub fn without_timeouts(mut self) -> Self {
        self.timeouts_enabled = false;
        self
    }

    /// Disable the correlation link entirely
    pub fn without_correlation(mut self) -> Self {
        self.correlation_enabled = false;
        self
    }

    /// Register an instrumentation hook
    pub fn hook(mut self, hook: Arc<dyn ChainHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Attach a policy registry so calls can run under named policies
    pub fn registry(mut self, registry: Arc<PolicyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Policies (outermost first) applied to every `send` by default
    pub fn default_policies<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.default_policies = names.into_iter().map(Into::into).collect();
        self
    }

    /// Use an externally owned metrics collector
    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> PipelineResult<PipelineClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let config = self.config.unwrap_or_default();
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(PipelineMetrics::new()));

        let mut chain = HandlerChain::builder(transport).metrics(metrics);
        for hook in self.hooks {
            chain = chain.hook(hook);
        }
        if self.correlation_enabled {
            chain = chain.correlation(config.subscribe());
        }
        if self.timeouts_enabled {
            chain = chain.timeout(config.subscribe());
        }
        if let Some((auth_config, source)) = self.authorization {
            chain = chain.authorization(auth_config, source);
        }

        Ok(PipelineClient {
            chain: chain.build(),
            executor: self.registry.map(PolicyExecutor::new),
            default_policies: self.default_policies.into(),
            config,
        })
    }
}
