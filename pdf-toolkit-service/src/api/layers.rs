//! Response middleware applied to every route.

use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, histogram};

static X_PROCESS_TIME: HeaderName = HeaderName::from_static("x-process-time");

/// Hardening headers for browsers talking to the API
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    response
}

/// `X-Process-Time` in seconds, plus request metrics
pub async fn process_time(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    let mut response = next.run(request).await;

    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    counter!("pdf_toolkit_http_requests_total", "method" => method.clone(), "status" => status)
        .increment(1);
    histogram!("pdf_toolkit_http_request_seconds", "method" => method).record(elapsed);

    if let Ok(value) = HeaderValue::from_str(&format!("{:.4}", elapsed)) {
        response.headers_mut().insert(X_PROCESS_TIME.clone(), value);
    }
    response
}
