//! Outrigger HTTP: the outbound handler chain
//!
//! Interceptors compose in a fixed order around a pluggable transport:
//!
//! ```text
//! AuthorizationHandler → TimeoutHandler → CorrelationPropagator → Transport
//! ```
//!
//! Each link may mutate the request, delegate downward, inspect the
//! response, short-circuit, or delegate again to retry. [`PipelineClient`]
//! assembles a chain together with the policy engine from `outrigger-core`
//! so whole calls can run under named retry/circuit-breaker/fallback
//! policies.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod auth;
pub mod client;
pub mod context;
pub mod correlation;
pub mod handler;
pub mod message;
pub mod timeout;
pub mod transport;

pub use auth::{AccessToken, AuthScheme, AuthorizationConfig, AuthorizationHandler, TokenSource};
pub use client::{PipelineClient, PipelineClientBuilder};
pub use context::RequestContext;
pub use correlation::CorrelationPropagator;
pub use handler::{ChainHooks, Handler, HandlerChain, HandlerChainBuilder};
pub use message::{Request, Response, TimeoutDirective};
pub use timeout::TimeoutHandler;
pub use transport::{FnTransport, ReqwestTransport, Transport};
