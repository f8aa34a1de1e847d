//! Trace and request-id propagation middleware.
//!
//! Ingress keeps an incoming `X-Trace-ID` (preserving distributed traces)
//! or mints a new one, always mints a fresh `X-Request-ID`, echoes both on
//! the response, and wraps the request in a span so every log line emitted
//! while handling it carries the ids.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{info, info_span, Instrument};

use estateguard_events::TraceContext;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn trace_context(request: Request<Body>, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let trace = match incoming {
        Some(trace_id) if TraceContext::is_valid_id(&trace_id) => {
            TraceContext::with_trace(trace_id)
        }
        _ => TraceContext::generate(),
    };

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let mut request = request;
    request.extensions_mut().insert(trace.clone());

    let span = info_span!(
        "http_request",
        trace_id = %trace.trace_id,
        request_id = %trace.request_id,
        method = %method,
        path = %path,
    );

    let mut response = next.run(request).instrument(span).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&trace.trace_id) {
        headers.insert(TRACE_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&trace.request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    info!(
        trace_id = %trace.trace_id,
        request_id = %trace.request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
