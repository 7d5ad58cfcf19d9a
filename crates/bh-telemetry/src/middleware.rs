use std::time::Instant;

use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::metrics::global_metrics;

/// Axum middleware that injects `X-Request-Id` headers and creates a tracing
/// span for each request.
///
/// If the incoming request already has an `X-Request-Id` header, that value
/// is reused. The response always includes the header for correlation.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().as_simple().to_string());

    // Insert/overwrite so downstream handlers can read it.
    request.headers_mut().insert(
        "x-request-id",
        request_id
            .parse()
            .unwrap_or_else(|_| axum::http::HeaderValue::from_static("unknown")),
    );

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );
    let _guard = span.enter();

    let mut response = next.run(request).await;
    if let Ok(val) = request_id.parse() {
        response.headers_mut().insert("x-request-id", val);
    }
    response
}

/// Axum middleware recording per-request metrics: a labelled counter and the
/// duration accumulator.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let m = global_metrics();
    m.increment_counter(
        "api_requests_total",
        &[("method", &method), ("path", &path), ("status", &status)],
    );
    m.record_duration(start.elapsed().as_secs_f64());
    response
}
