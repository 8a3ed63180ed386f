//! Request pipeline.
//!
//! Every inbound call passes through an `InterceptorChain` before it reaches a
//! handler. Stages are synchronous and see the call plus the `Caller` produced
//! by the previous stage; the final `Caller` is attached to that request only
//! and handed to the handler as an extractor argument.

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{RateLimitConfig, RateLimitInterceptor, RateLimitResult, RateLimiter};

use crate::auth::error::AuthError;
use crate::auth::models::Identity;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Rate-limit key shared by every unauthenticated caller.
pub const ANONYMOUS_KEY: &str = "anonymous";

/// What an interceptor may look at: the procedure being called and its headers.
#[derive(Debug, Clone, Copy)]
pub struct Call<'a> {
    pub procedure: &'a str,
    pub headers: &'a HeaderMap,
}

/// Who is making the call, as established so far by the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    Authenticated(Identity),
}

impl Caller {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Caller::Anonymous => None,
            Caller::Authenticated(identity) => Some(identity),
        }
    }

    /// Bucket key: the user id when authenticated, else the shared anonymous key.
    pub fn rate_limit_key(&self) -> String {
        match self {
            Caller::Anonymous => ANONYMOUS_KEY.to_string(),
            Caller::Authenticated(identity) => identity.user_id.to_string(),
        }
    }
}

/// One stage of the pipeline. Returns the caller to hand to the next stage,
/// or the error that ends the call.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn intercept(&self, call: &Call<'_>, caller: Caller) -> Result<Caller, AuthError>;
}

/// Ordered list of stages, fixed at wiring time.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I: Interceptor + 'static>(mut self, stage: I) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run every stage in order starting from an anonymous caller.
    pub fn run(&self, call: &Call<'_>) -> Result<Caller, AuthError> {
        self.stages
            .iter()
            .try_fold(Caller::Anonymous, |caller, stage| {
                stage.intercept(call, caller)
            })
    }
}

/// axum adapter: runs the chain and attaches the resulting `Caller` to the request
pub async fn intercept(
    State(chain): State<Arc<InterceptorChain>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let caller = {
        let call = Call {
            procedure: req.uri().path(),
            headers: req.headers(),
        };
        chain.run(&call)?
    };

    req.extensions_mut().insert(caller);

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Caller>()
            .cloned()
            .unwrap_or(Caller::Anonymous))
    }
}

/// Handlers that take an `Identity` only run for authenticated callers.
#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Caller::from_request_parts(parts, state).await? {
            Caller::Authenticated(identity) => Ok(identity),
            Caller::Anonymous => Err(AuthError::Unauthenticated),
        }
    }
}
