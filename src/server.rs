//! HTTP surface
//! Mission: Mount AuthService RPCs behind the interceptor chain

use crate::auth::{api as auth_api, AuthInterceptor, RoleInterceptor, SessionManager, TokenCodec};
use crate::config::{
    AuthConfig, LOGIN_PROCEDURE, LOGOUT_PROCEDURE, REFRESH_TOKEN_PROCEDURE, REGISTER_PROCEDURE,
};
use crate::middleware::{
    intercept, request_logging, InterceptorChain, RateLimitInterceptor, RateLimiter,
};
use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

/// AuthService procedures, unguarded. Wrap with `build_app` or `protect`.
pub fn identity_router(sessions: Arc<SessionManager>) -> Router {
    Router::new()
        .route(REGISTER_PROCEDURE, post(auth_api::register))
        .route(LOGIN_PROCEDURE, post(auth_api::login))
        .route(REFRESH_TOKEN_PROCEDURE, post(auth_api::refresh_token))
        .route(LOGOUT_PROCEDURE, post(auth_api::logout))
        .with_state(sessions)
}

/// Authentication, then rate limiting keyed by the bound caller, then role checks.
pub fn interceptor_chain(
    config: &AuthConfig,
    codec: Arc<TokenCodec>,
    limiter: Arc<RateLimiter>,
    roles: RoleInterceptor,
) -> InterceptorChain {
    InterceptorChain::new()
        .with(
            AuthInterceptor::new(codec, config.public_procedures.clone())
                .charge_rejections(limiter.clone()),
        )
        .with(RateLimitInterceptor::new(limiter))
        .with(roles)
}

/// Run `chain` in front of every route of `router`
pub fn protect(router: Router, chain: Arc<InterceptorChain>) -> Router {
    router.route_layer(middleware::from_fn_with_state(chain, intercept))
}

/// Full application: guarded services, `/health`, request logging and CORS
pub fn build_app(services: Router, chain: Arc<InterceptorChain>, cors_origins: &[String]) -> Router {
    info!(stages = ?chain.stage_names(), "🛡️  Interceptor chain ready");

    Router::new()
        .route("/health", get(health))
        .merge(protect(services, chain))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(cors_origins))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `*` or no origins allows every origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|origin| origin.trim() == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_accepts_lists() {
        let _ = cors_layer(&[]);
        let _ = cors_layer(&["*".to_string()]);
        let _ = cors_layer(&[
            "https://chefnext.app".to_string(),
            "http://localhost:3000".to_string(),
        ]);
    }

    #[tokio::test]
    async fn test_health_body() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
