//! Authentication Middleware
//! Mission: Bind a verified identity to each call, then gate procedures by role

use crate::auth::{error::AuthError, jwt::TokenCodec, models::Role};
use crate::middleware::{Call, Caller, Interceptor, RateLimitResult, RateLimiter, ANONYMOUS_KEY};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// Scheme is matched case-insensitively; exactly one space separates it from
/// the token. Anything else is treated as no token at all.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;

    let mut parts = value.split(' ');
    let scheme = parts.next()?;
    let token = parts.next()?;

    if parts.next().is_some() || token.is_empty() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

/// Verifies the access token on every non-public procedure
pub struct AuthInterceptor {
    codec: Arc<TokenCodec>,
    public_procedures: HashSet<String>,
    rejections: Option<Arc<RateLimiter>>,
}

impl AuthInterceptor {
    pub fn new(codec: Arc<TokenCodec>, public_procedures: HashSet<String>) -> Self {
        Self {
            codec,
            public_procedures,
            rejections: None,
        }
    }

    /// Charge every rejected call to the anonymous bucket of `limiter`.
    /// Once that bucket is empty, rejections turn into ResourceExhausted.
    pub fn charge_rejections(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rejections = Some(limiter);
        self
    }

    pub fn is_public(&self, procedure: &str) -> bool {
        self.public_procedures.contains(procedure)
    }

    fn reject(&self, call: &Call<'_>) -> AuthError {
        let Some(limiter) = &self.rejections else {
            return AuthError::Unauthenticated;
        };

        match limiter.check(ANONYMOUS_KEY) {
            RateLimitResult::Allowed { .. } => AuthError::Unauthenticated,
            RateLimitResult::Exceeded { .. } => {
                warn!(procedure = %call.procedure, "Rate limit exceeded by rejected calls");
                AuthError::ResourceExhausted
            }
        }
    }
}

impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn intercept(&self, call: &Call<'_>, caller: Caller) -> Result<Caller, AuthError> {
        if self.is_public(call.procedure) {
            return Ok(caller);
        }

        let Some(token) = bearer_token(call.headers) else {
            debug!(procedure = %call.procedure, "Rejected call: missing bearer token");
            return Err(self.reject(call));
        };

        // The reason stays in the log; the caller only sees Unauthenticated.
        let claims = self.codec.verify_access(token).map_err(|e| {
            warn!(procedure = %call.procedure, reason = %e, "Rejected call: bad access token");
            self.reject(call)
        })?;

        Ok(Caller::Authenticated(claims.identity()))
    }
}

/// Per-procedure role allow-lists. Procedures without an entry are not role-gated.
#[derive(Default)]
pub struct RoleInterceptor {
    allowed: HashMap<String, HashSet<Role>>,
}

impl RoleInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, procedure: impl Into<String>, roles: &[Role]) -> Self {
        self.allowed
            .entry(procedure.into())
            .or_default()
            .extend(roles.iter().copied());
        self
    }
}

impl Interceptor for RoleInterceptor {
    fn name(&self) -> &'static str {
        "role"
    }

    fn intercept(&self, call: &Call<'_>, caller: Caller) -> Result<Caller, AuthError> {
        let Some(roles) = self.allowed.get(call.procedure) else {
            return Ok(caller);
        };

        let identity = caller.identity().ok_or(AuthError::Unauthenticated)?;
        if !roles.contains(&identity.role) {
            warn!(
                procedure = %call.procedure,
                user_id = %identity.user_id,
                role = %identity.role,
                "Permission denied"
            );
            return Err(AuthError::PermissionDenied);
        }

        Ok(caller)
    }
}
