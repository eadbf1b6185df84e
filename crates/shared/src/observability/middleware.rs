//! axum 中间件：请求 span、HTTP 指标与 x-request-id 透传

use std::time::Instant;

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span};

use super::metrics;

/// 请求 ID 头
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 每个请求一个 `http_request` span，结束时补记状态码和耗时
///
/// ```ignore
/// let app = Router::new()
///     .route("/health", get(health))
///     .layer(axum::middleware::from_fn(http_tracing));
/// ```
pub async fn http_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let span = info_span!(
        "http_request",
        %method,
        %path,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let started = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let elapsed = started.elapsed();
    let status = response.status();

    span.record("status", status.as_u16());
    span.record("latency_ms", elapsed.as_millis() as u64);
    metrics::record_http_request(method.as_str(), &path, status.as_u16(), elapsed.as_secs_f64());

    response
}

/// 沿用调用方的 x-request-id，缺失或不是合法字符串时生成 UUID，并回写到响应头
pub async fn request_id(request: Request, next: Next) -> Response {
    let id = match request.headers().get(REQUEST_ID_HEADER) {
        Some(value) if value.to_str().is_ok() => value.clone(),
        _ => HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    };

    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, id);
    response
}
