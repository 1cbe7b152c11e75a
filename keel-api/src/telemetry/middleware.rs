//! Axum Middleware for Request Observability
//!
//! Every request gets:
//! - a root span in a fresh [`RequestTrace`](super::spans::RequestTrace)
//! - a replayable copy of its body, redacted for the access log
//! - one access log record, one metrics sample, and an error report when the
//!   status is 400 or above
//!
//! A panic below this layer is reported here once, logged as a 500, and then
//! resumed so `CatchPanicLayer` can build the response.

use axum::{
    body::{Body, HttpBody as _},
    extract::{ConnectInfo, MatchedPath, RawPathParams, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    RequestExt,
};
use chrono::{SecondsFormat, Utc};
use futures_util::FutureExt;
use keel_events::EventPublisher;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, Instrument};

use super::log_sink::{LogRecord, LogSink, TracingLogSink};
use super::metrics::METRICS;
use super::panic::panic_message;
use super::reporter::{ErrorReporter, Severity, TracingReporter};
use super::spans::{RequestTrace, SpanHandle, SpanStatus};
use crate::config::{ApiConfig, DEFAULT_LOG_BODY_LIMIT, DEFAULT_MAX_BODY_BYTES};
use crate::error::ApiError;
use crate::redaction::{redact_headers, render_body};

/// Correlation header, read from the request and echoed on the response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Metrics label for requests no route matched (fallback, early 413).
pub const UNMATCHED_ROUTE: &str = "unmatched";

static UUID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}").ok()
});

static ID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"/\d+(/|$)").ok());

/// Normalize path for span descriptions (replace UUIDs and IDs with
/// placeholders).
///
/// Used only when the router has not matched a route pattern. Metrics never
/// see it; they use [`UNMATCHED_ROUTE`] instead.
pub fn normalize_path(path: &str) -> String {
    let mut result = path.to_string();
    if let Some(uuid) = UUID_PATTERN.as_ref() {
        result = uuid.replace_all(&result, "{id}").into_owned();
    }
    if let Some(id) = ID_PATTERN.as_ref() {
        // Adjacent ids share a slash, so one pass can miss every other one.
        for _ in 0..2 {
            result = id.replace_all(&result, "/{id}$1").into_owned();
        }
    }
    result
}

/// Collaborators of the observability middleware.
#[derive(Clone)]
pub struct Observability {
    pub sink: Arc<dyn LogSink>,
    pub reporter: Arc<dyn ErrorReporter>,
    /// Character budget for logged bodies.
    pub body_log_limit: usize,
    /// Largest body that will be buffered. Larger requests get 413.
    pub max_body_bytes: usize,
    /// Receives `system.error` when a handler panics.
    pub events: Option<EventPublisher>,
}

impl std::fmt::Debug for Observability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observability")
            .field("body_log_limit", &self.body_log_limit)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

impl Default for Observability {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogSink), Arc::new(TracingReporter))
    }
}

impl Observability {
    pub fn new(sink: Arc<dyn LogSink>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            sink,
            reporter,
            body_log_limit: DEFAULT_LOG_BODY_LIMIT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Tracing-backed sink and reporter with limits from `config`.
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            body_log_limit: config.log_body_limit,
            max_body_bytes: config.max_body_bytes,
            ..Self::default()
        }
    }

    pub fn with_body_log_limit(mut self, limit: usize) -> Self {
        self.body_log_limit = limit;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

/// Request facts captured before the handler runs.
struct RequestFacts {
    timestamp: String,
    method: String,
    path: String,
    query_params: String,
    client_ip: String,
    user_agent: String,
    content_type: String,
    content_length: Option<u64>,
    headers: BTreeMap<String, String>,
    correlation_id: String,
}

impl RequestFacts {
    fn capture(request: &Request, correlation_id: String) -> Self {
        let headers = request.headers();
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            query_params: request.uri().query().unwrap_or_default().to_string(),
            client_ip: client_ip(request),
            user_agent: header_str(headers, header::USER_AGENT.as_str()),
            content_type: header_str(headers, header::CONTENT_TYPE.as_str()),
            content_length: headers
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
            headers: redact_headers(headers),
            correlation_id,
        }
    }

    fn report_context(&self, status: u16, duration_ms: u64) -> serde_json::Value {
        json!({
            "status_code": status,
            "path": self.path,
            "method": self.method,
            "request_id": self.correlation_id,
            "duration_ms": duration_ms,
        })
    }

    fn into_record(
        self,
        status_code: u16,
        duration_ms: u64,
        request_body: Option<String>,
        trace: &RequestTrace,
        response_size: Option<u64>,
        panicked: bool,
    ) -> LogRecord {
        let url_params = trace.url_params();
        let spans = trace.snapshot();
        LogRecord {
            timestamp: self.timestamp,
            method: self.method,
            path: self.path,
            query_params: self.query_params,
            status_code,
            duration_ms,
            client_ip: self.client_ip,
            user_agent: self.user_agent,
            content_type: self.content_type,
            content_length: self.content_length,
            headers: self.headers,
            request_body,
            url_params: (!url_params.is_empty()).then_some(url_params),
            route: trace.route(),
            span_status: spans.first().and_then(|root| root.status),
            span_count: spans.len(),
            correlation_id: self.correlation_id,
            response_size,
            panicked,
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// First forwarded address, then `x-real-ip`, then the socket peer.
fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    if let Some(ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return ip.trim().to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn response_size(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| response.body().size_hint().exact())
}

/// Route label for metrics. Raw paths are kept out so the series count stays
/// bounded by the route table.
fn metrics_route(trace: &RequestTrace) -> String {
    trace.route().unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Observability middleware for Axum.
///
/// Install with `axum::middleware::from_fn_with_state`, outside the router's
/// routes and inside `CatchPanicLayer`.
pub async fn observability_middleware(
    State(obs): State<Observability>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let facts = RequestFacts::capture(&request, correlation_id(request.headers()));
    let normalized_path = normalize_path(&facts.path);

    let root = SpanHandle::root(
        facts.correlation_id.clone(),
        "http.server",
        &format!("{} {}", facts.method, normalized_path),
    );
    root.set_tag("http.method", facts.method.clone());
    root.set_tag("http.target", facts.path.clone());

    // Buffer the body so it can be logged and still reach the handler.
    let declared_too_large = facts
        .content_length
        .is_some_and(|len| len > obs.max_body_bytes as u64);
    let (parts, body) = request.into_parts();
    let buffered = if declared_too_large {
        None
    } else {
        axum::body::to_bytes(body, obs.max_body_bytes).await.ok()
    };
    let Some(bytes) = buffered else {
        let response = ApiError::payload_too_large(obs.max_body_bytes).into_response();
        return finish_request(&obs, &root, facts, start, None, response);
    };
    let request_body = render_body(&bytes, obs.body_log_limit);

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(root.clone());

    let tracing_span = info_span!(
        "http_request",
        http.method = %facts.method,
        http.target = %facts.path,
        request_id = %facts.correlation_id,
    );

    match AssertUnwindSafe(next.run(request).instrument(tracing_span))
        .catch_unwind()
        .await
    {
        Ok(response) => finish_request(&obs, &root, facts, start, request_body, response),
        Err(payload) => {
            let duration_ms = elapsed_ms(start);
            let message = panic_message(payload.as_ref());
            let mut context = facts.report_context(500, duration_ms);
            context["panic"] = json!(true);
            obs.reporter.capture_error(&message, &context);
            if let Some(events) = &obs.events {
                let data = json!({ "error": message, "context": context });
                if let Err(err) = events.publish_system_event("error", &data) {
                    debug!(error = %err, "system.error event not queued");
                }
            }

            root.set_tag("http.status_code", "500");
            root.finish(SpanStatus::InternalError);

            if let Ok(metrics) = METRICS.as_ref() {
                let route = metrics_route(root.trace());
                metrics.record_http_request(&facts.method, &route, 500, start.elapsed().as_secs_f64());
            }
            obs.sink
                .emit(facts.into_record(500, duration_ms, request_body, root.trace(), None, true));

            std::panic::resume_unwind(payload)
        }
    }
}

fn finish_request(
    obs: &Observability,
    root: &SpanHandle,
    facts: RequestFacts,
    start: Instant,
    request_body: Option<String>,
    mut response: Response,
) -> Response {
    let duration_ms = elapsed_ms(start);
    let status = response.status().as_u16();

    if status >= 400 {
        let message = if status >= 500 {
            "HTTP Server Error"
        } else {
            "HTTP Error"
        };
        obs.reporter.capture_message(
            message,
            Severity::from_http(status),
            &facts.report_context(status, duration_ms),
        );
    }

    root.set_tag("http.status_code", status.to_string());
    root.finish(SpanStatus::from_http(status));

    if let Ok(metrics) = METRICS.as_ref() {
        let route = metrics_route(root.trace());
        metrics.record_http_request(&facts.method, &route, status, start.elapsed().as_secs_f64());
    }

    if let Ok(value) = HeaderValue::from_str(&facts.correlation_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let size = response_size(&response);
    obs.sink.emit(facts.into_record(
        status,
        duration_ms,
        request_body,
        root.trace(),
        size,
        false,
    ));
    response
}

/// Route-level layer that records the matched route pattern and path
/// parameters on the request's trace.
///
/// Install with `Router::route_layer` so `MatchedPath` is available.
pub async fn capture_route(mut request: Request, next: Next) -> Response {
    let root = request.extensions().get::<SpanHandle>().cloned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string());

    if let (Some(root), Some(route)) = (root, route) {
        let url_params = match request.extract_parts::<RawPathParams>().await {
            Ok(params) => params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Err(_) => BTreeMap::new(),
        };
        root.set_description(format!("{} {}", request.method(), route));
        root.set_tag("http.route", route.clone());
        root.trace().set_route(route, url_params);
    }

    next.run(request).await
}
