//! Request logging middleware.
//!
//! Logs every call with method, procedure, status code, and latency.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, warn};

/// Logs at INFO for completed calls and WARN for 5xx. Health checks are skipped.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let procedure = request.uri().path().to_string();

    // Skip logging for health checks to reduce noise
    if procedure == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(
            method = %method,
            procedure = %procedure,
            status = status,
            latency_ms = latency.as_millis() as u64,
            "Call failed (5xx)"
        );
    } else {
        info!(
            method = %method,
            procedure = %procedure,
            status = status,
            latency_ms = latency.as_millis() as u64,
            "Call completed"
        );
    }

    response
}
