//! Transport seam: the terminal "send request, get response or failure" hop
//!
//! Everything above this trait is transport-agnostic. [`ReqwestTransport`]
//! is the production implementation; [`FnTransport`] adapts a closure for
//! tests and in-process stubs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::Client as ReqwestClient;
use tracing::debug;

use outrigger_core::error::{PipelineError, PipelineResult};

use crate::context::RequestContext;
use crate::message::{Request, Response};

/// The underlying network hop
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request, observing the context's cancellation signal
    async fn dispatch(&self, request: Request, ctx: &RequestContext) -> PipelineResult<Response>;
}

/// Production transport backed by a shared `reqwest` client
///
/// Connection pooling and TLS live entirely inside the client; this adapter
/// only translates between the pipeline's message model and the wire. The
/// client carries no request timeout of its own — bounds are the timeout
/// handler's job, so the two never race.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Convenience constructor with default configuration
    pub fn new() -> PipelineResult<Self> {
        Self::builder().build()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn dispatch(&self, request: Request, ctx: &RequestContext) -> PipelineResult<Response> {
        if ctx.cancellation().is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }

        debug!(method = %request.method, url = %request.url, "dispatching request");

        let send = async {
            let wire_response = builder
                .send()
                .await
                .map_err(|err| PipelineError::transport(err.to_string()))?;

            let status = wire_response.status().as_u16();
            let mut response = Response::new(status);
            for (name, value) in wire_response.headers() {
                if let Ok(value) = value.to_str() {
                    response.set_header(name.as_str(), value);
                }
            }
            let body = wire_response
                .bytes()
                .await
                .map_err(|err| PipelineError::transport(err.to_string()))?;
            Ok(response.with_body(body.to_vec()))
        };

        tokio::select! {
            result = send => {
                if let Ok(response) = &result {
                    debug!(status = response.status, "received response");
                }
                result
            }
            () = ctx.cancellation().cancelled() => Err(PipelineError::Cancelled),
        }
    }
}

/// Builder for [`ReqwestTransport`]
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    connect_timeout: Duration,
    user_agent: Option<String>,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self { connect_timeout: Duration::from_secs(10), user_agent: None }
    }
}

impl ReqwestTransportBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> PipelineResult<ReqwestTransport> {
        let mut builder =
            ReqwestClient::builder().connect_timeout(self.connect_timeout).no_proxy();
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        let client =
            builder.build().map_err(|err| PipelineError::transport(err.to_string()))?;
        Ok(ReqwestTransport { client })
    }
}

type DispatchFn =
    Arc<dyn Fn(Request) -> BoxFuture<'static, PipelineResult<Response>> + Send + Sync>;

/// Closure-backed transport for tests and in-process stubs
#[derive(Clone)]
pub struct FnTransport {
    dispatch: DispatchFn,
}

impl FnTransport {
    pub fn new<F, Fut>(dispatch: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<Response>> + Send + 'static,
    {
        Self { dispatch: Arc::new(move |request| Box::pin(dispatch(request))) }
    }
}

#[async_trait]
impl Transport for FnTransport {
    async fn dispatch(&self, request: Request, ctx: &RequestContext) -> PipelineResult<Response> {
        if ctx.cancellation().is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        tokio::select! {
            result = (self.dispatch)(request) => result,
            () = ctx.cancellation().cancelled() => Err(PipelineError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_transport_runs_the_closure() {
        let transport = FnTransport::new(|request: Request| async move {
            assert_eq!(request.method, reqwest::Method::GET);
            Ok(Response::new(200).with_body(b"ok".to_vec()))
        });

        let request =
            Request::get(url::Url::parse("https://example.test/").expect("valid url"));
        let response =
            transport.dispatch(request, &RequestContext::new()).await.expect("stub response");
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "ok");
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let transport = FnTransport::new(|_| async { Ok(Response::new(200)) });
        let ctx = RequestContext::new();
        ctx.cancellation().cancel();

        let request =
            Request::get(url::Url::parse("https://example.test/").expect("valid url"));
        let result = transport.dispatch(request, &ctx).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_hung_dispatch() {
        let transport = FnTransport::new(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Response::new(200))
        });
        let ctx = RequestContext::new();
        let cancel = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let request =
            Request::get(url::Url::parse("https://example.test/").expect("valid url"));
        let result = transport.dispatch(request, &ctx).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
