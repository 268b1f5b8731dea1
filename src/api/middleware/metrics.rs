use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Logs one `request_completed` event per request under the `metrics` target.
/// For merges the latency covers time to first byte; the body is still streaming.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let content_length = req
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let response = next.run(req).await;

    info!(
        target: "metrics",
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        request_bytes = content_length,
        latency_ms = %start.elapsed().as_millis(),
        "request_completed"
    );

    response
}
