//! Authorization handler: token lifecycle for one downstream target
//!
//! Attaches a credential to every outbound request, refreshing it through a
//! single-flight gate: when N concurrent requests find the token missing or
//! near expiry, exactly one refresh call goes out and all N observe its
//! result. A 401 on a request that carried this handler's scheme is treated
//! as a stale-token signal: the handler forces one refresh (the server is
//! the authority, regardless of what the cached expiry says) and resends
//! exactly once. A second 401 surfaces to the caller.
//!
//! The token store is exclusively owned by its handler instance; nothing
//! else reads or writes it. The refresh call carries its own bound so a
//! hung token endpoint cannot hold the gate indefinitely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use outrigger_core::clock::{Clock, SystemClock};
use outrigger_core::error::{PipelineError, PipelineResult};
use outrigger_core::metrics::PipelineMetrics;

use crate::context::RequestContext;
use crate::handler::Handler;
use crate::message::{Request, Response};

/// Credential scheme for the `Authorization` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
}

impl AuthScheme {
    /// The scheme prefix as it appears in the header value
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Bearer => "Bearer",
        }
    }
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A cached credential with its expiration
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub scheme: AuthScheme,
}

impl AccessToken {
    /// Full `Authorization` header value
    pub fn header_value(&self) -> String {
        format!("{} {}", self.scheme.prefix(), self.value)
    }

    /// Whether the token expires within `window` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at <= now + window
    }
}

type TokenRequestFn = Arc<dyn Fn() -> Request + Send + Sync>;
type TokenExtractFn =
    Arc<dyn Fn(&Response) -> PipelineResult<(String, DateTime<Utc>)> + Send + Sync>;

/// Caller-supplied token acquisition: how to build the refresh request and
/// how to read a token out of the response
///
/// The handler never assumes a specific token response shape.
#[derive(Clone)]
pub struct TokenSource {
    build_request: TokenRequestFn,
    extract: TokenExtractFn,
}

impl TokenSource {
    pub fn new<B, E>(build_request: B, extract: E) -> Self
    where
        B: Fn() -> Request + Send + Sync + 'static,
        E: Fn(&Response) -> PipelineResult<(String, DateTime<Utc>)> + Send + Sync + 'static,
    {
        Self { build_request: Arc::new(build_request), extract: Arc::new(extract) }
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource").finish_non_exhaustive()
    }
}

/// Configuration for [`AuthorizationHandler`]
#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    /// Scheme attached to outbound requests
    pub scheme: AuthScheme,
    /// Refresh when the cached token expires within this window
    pub refresh_lookahead: Duration,
    /// Bound on the refresh call itself, so the gate is never held across
    /// an unbounded wait
    pub refresh_timeout: Duration,
}

impl AuthorizationConfig {
    pub fn bearer() -> Self {
        Self {
            scheme: AuthScheme::Bearer,
            refresh_lookahead: Duration::from_secs(60),
            refresh_timeout: Duration::from_secs(10),
        }
    }

    pub fn refresh_lookahead(mut self, window: Duration) -> Self {
        self.refresh_lookahead = window;
        self
    }

    pub fn refresh_timeout(mut self, bound: Duration) -> Self {
        self.refresh_timeout = bound;
        self
    }
}

/// Token store: the one shared-mutable-state hotspot in the chain
///
/// Readers take the lock briefly to clone the current token; the token is
/// replaced only inside the single-flight critical section, so a reader
/// observes either the previous or the fully refreshed token, never a
/// partial value.
#[derive(Debug, Default)]
struct TokenStore {
    current: RwLock<Option<AccessToken>>,
    gate: Mutex<()>,
}

/// Outbound interceptor managing the credential for one downstream target
pub struct AuthorizationHandler<C: Clock = SystemClock> {
    next: Arc<dyn Handler>,
    config: AuthorizationConfig,
    source: TokenSource,
    store: TokenStore,
    metrics: Arc<PipelineMetrics>,
    clock: C,
}

impl AuthorizationHandler<SystemClock> {
    pub fn new(
        next: Arc<dyn Handler>,
        config: AuthorizationConfig,
        source: TokenSource,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self::with_clock(next, config, source, metrics, SystemClock)
    }
}

impl<C: Clock> AuthorizationHandler<C> {
    pub fn with_clock(
        next: Arc<dyn Handler>,
        config: AuthorizationConfig,
        source: TokenSource,
        metrics: Arc<PipelineMetrics>,
        clock: C,
    ) -> Self {
        Self { next, config, source, store: TokenStore::default(), metrics, clock }
    }

    fn cached_if_fresh(&self, cached: &Option<AccessToken>) -> Option<AccessToken> {
        let now = self.clock.utc_now();
        cached
            .as_ref()
            .filter(|token| !token.expires_within(now, self.config.refresh_lookahead))
            .cloned()
    }

    /// Return a token valid beyond the lookahead window, refreshing at most
    /// once across all concurrent callers
    async fn ensure_token(&self, ctx: &RequestContext) -> PipelineResult<AccessToken> {
        if let Some(token) = self.cached_if_fresh(&*self.store.current.read().await) {
            return Ok(token);
        }

        let _flight = self.store.gate.lock().await;
        // Double check: a previous gate holder may have refreshed already.
        if let Some(token) = self.cached_if_fresh(&*self.store.current.read().await) {
            return Ok(token);
        }
        self.refresh_while_gated(ctx).await
    }

    /// Refresh unconditionally unless someone else already replaced the
    /// token we sent — the stale-token signal came from the server, so the
    /// cached expiry is not consulted
    async fn force_refresh(
        &self,
        sent_value: &str,
        ctx: &RequestContext,
    ) -> PipelineResult<AccessToken> {
        let _flight = self.store.gate.lock().await;
        if let Some(token) = self.store.current.read().await.as_ref() {
            if token.value != sent_value {
                debug!("token already replaced by a concurrent refresh");
                return Ok(token.clone());
            }
        }
        self.refresh_while_gated(ctx).await
    }

    /// The refresh network call; caller must hold the gate
    async fn refresh_while_gated(&self, ctx: &RequestContext) -> PipelineResult<AccessToken> {
        let refresh_request = (self.source.build_request)();
        debug!(url = %refresh_request.url, "refreshing access token");

        let outcome = tokio::time::timeout(
            self.config.refresh_timeout,
            self.next.handle(refresh_request, ctx),
        )
        .await;

        let response = match outcome {
            Err(_) => {
                warn!(bound = ?self.config.refresh_timeout, "token refresh timed out");
                return Err(PipelineError::AuthorizationFailed {
                    status: None,
                    detail: format!(
                        "token refresh timed out after {:?}",
                        self.config.refresh_timeout
                    ),
                });
            }
            Ok(Err(error)) if error.is_cancellation() => return Err(error),
            Ok(Err(error)) => {
                return Err(PipelineError::AuthorizationFailed {
                    status: None,
                    detail: error.to_string(),
                });
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            warn!(status = response.status, "token endpoint rejected refresh");
            return Err(PipelineError::AuthorizationFailed {
                status: Some(response.status),
                detail: "token endpoint returned a non-success status".to_string(),
            });
        }

        let (value, expires_at) = (self.source.extract)(&response)?;
        let token = AccessToken { value, expires_at, scheme: self.config.scheme };

        *self.store.current.write().await = Some(token.clone());
        self.metrics.record_token_refresh();
        info!(expires_at = %token.expires_at, "access token refreshed");
        Ok(token)
    }
}

#[async_trait]
impl<C: Clock> Handler for AuthorizationHandler<C> {
    async fn handle(&self, mut request: Request, ctx: &RequestContext) -> PipelineResult<Response> {
        let token = self.ensure_token(ctx).await?;
        let sent_value = token.value.clone();
        // Replace any prior value; the handler is the authority for this
        // header on its target.
        request.set_header("authorization", token.header_value());

        let response = self.next.handle(request.clone(), ctx).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        // Only a request that actually carried this handler's scheme is a
        // stale-token signal; anything else surfaces as-is.
        let carried_scheme = request
            .header("authorization")
            .is_some_and(|value| value.starts_with(self.config.scheme.prefix()));
        if !carried_scheme {
            return Ok(response);
        }

        debug!(status = response.status, "unauthorized response, forcing token refresh");
        self.metrics.record_unauthorized_retry();
        let fresh = self.force_refresh(&sent_value, ctx).await?;
        request.set_header("authorization", fresh.header_value());

        let retried = self.next.handle(request, ctx).await?;
        if retried.is_unauthorized() {
            // Credentials are rejected even when fresh; never loop.
            return Err(PipelineError::UnauthorizedAfterRetry { status: retried.status });
        }
        Ok(retried)
    }
}
