//! Request observability: access log records, redaction, error reports,
//! panic capture, body limits and correlation ids.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    routing::get,
    Extension, Router,
};
use keel_api::redaction::{REDACTED, SENSITIVE_BODY, TRUNCATED_MARKER};
use keel_api::telemetry::{Report, Severity, SpanHandle, SpanStatus};
use keel_api::AppState;
use serde_json::json;
use std::sync::{Arc, Mutex};

#[path = "support/app.rs"]
mod test_app_support;
use test_app_support::{json_request, user_payload, TestApp, TestAppOptions};

async fn explode() -> &'static str {
    panic!("handler exploded")
}

type SeenSpans = Arc<Mutex<Vec<SpanHandle>>>;

/// Leaves a child span open and answers 404.
async fn lookup_with_open_child(
    Extension(root): Extension<SpanHandle>,
    Extension(seen): Extension<SeenSpans>,
) -> StatusCode {
    let _child = root.child("db.query", "lookup");
    seen.lock().unwrap().push(root);
    StatusCode::NOT_FOUND
}

/// Leaves a child span open and panics.
async fn explode_with_open_child(
    Extension(root): Extension<SpanHandle>,
    Extension(seen): Extension<SeenSpans>,
) -> StatusCode {
    let _child = root.child("db.query", "lookup");
    seen.lock().unwrap().push(root);
    panic!("span route exploded")
}

async fn span_app() -> (TestApp, SeenSpans) {
    let seen = SeenSpans::default();
    let extra: Router<AppState> = Router::new()
        .route("/v1/spans/:id", get(lookup_with_open_child))
        .route("/v1/spans/:id/explode", get(explode_with_open_child))
        .layer(Extension(seen.clone()));
    let app = TestApp::build(TestAppOptions {
        extra_routes: Some(extra),
        ..Default::default()
    })
    .await;
    (app, seen)
}

fn metric_lines<'a>(text: &'a str, method: &str) -> Vec<&'a str> {
    let method = format!("method=\"{}\"", method);
    text.lines()
        .filter(|line| line.starts_with("keel_http_requests_total{") && line.contains(&method))
        .collect()
}

#[tokio::test]
async fn every_request_emits_exactly_one_record() {
    let app = TestApp::spawn().await;
    let id = app.create_user("ada").await;
    app.get(&format!("/v1/users/{}", id)).await;
    app.get("/v1/users/999").await;

    let records = app.sink.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].method, "POST");
    assert_eq!(records[0].status_code, 201);
    assert_eq!(records[0].message(), "HTTP Request");
    assert_eq!(records[2].status_code, 404);
    assert_eq!(records[2].message(), "HTTP Request Error");
    assert!(records.iter().all(|r| !r.panicked));
}

#[tokio::test]
async fn sensitive_headers_and_bodies_are_redacted() {
    let app = TestApp::spawn().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/users")
        .header("content-type", "application/json")
        .header("authorization", "Bearer super-secret")
        .header("x-api-key", "k-123")
        .header("x-trace-note", "visible")
        .body(Body::from(user_payload("ada").to_string()))
        .unwrap();
    app.send(request).await;

    let record = &app.sink.records()[0];
    assert_eq!(record.headers["authorization"], REDACTED);
    assert_eq!(record.headers["x-api-key"], REDACTED);
    assert_eq!(record.headers["x-trace-note"], "visible");
    assert_eq!(record.request_body.as_deref(), Some(SENSITIVE_BODY));

    let rendered = serde_json::to_string(record).unwrap();
    assert!(!rendered.contains("super-secret"));
    assert!(!rendered.contains("hunter22"));
}

#[tokio::test]
async fn plain_bodies_are_logged_and_long_ones_truncated() {
    let app = TestApp::build(TestAppOptions {
        body_log_limit: Some(40),
        ..Default::default()
    })
    .await;
    let id = app.create_user("ada").await;
    let uri = format!("/v1/users/{}", id);

    app.put_json(&uri, &json!({ "firstName": "Augusta" })).await;
    let long_name = "A".repeat(45);
    app.put_json(&uri, &json!({ "lastName": long_name })).await;

    let records = app.sink.records();
    assert_eq!(
        records[1].request_body.as_deref(),
        Some(r#"{"firstName":"Augusta"}"#)
    );
    let truncated = records[2].request_body.as_deref().unwrap();
    assert!(truncated.ends_with(TRUNCATED_MARKER));
    assert_eq!(truncated.chars().count(), 40 + TRUNCATED_MARKER.chars().count());
}

#[tokio::test]
async fn get_requests_have_no_body_and_keep_url_params() {
    let app = TestApp::spawn().await;
    app.get("/v1/users/7?verbose=1").await;

    let record = &app.sink.records()[0];
    assert_eq!(record.path, "/v1/users/7");
    assert_eq!(record.query_params, "verbose=1");
    assert!(record.request_body.is_none());
    let params = record.url_params.as_ref().unwrap();
    assert_eq!(params["id"], "7");
}

#[tokio::test]
async fn correlation_id_is_reused_or_generated() {
    let app = TestApp::spawn().await;

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-abc-123")
        .body(Body::empty())
        .unwrap();
    let echoed = app.send(request).await;
    assert_eq!(echoed.header("x-request-id"), Some("req-abc-123"));

    let generated = app.get("/health").await;
    let id = generated.header("x-request-id").unwrap().to_string();
    assert_eq!(id.len(), 36);

    let records = app.sink.records();
    assert_eq!(records[0].correlation_id, "req-abc-123");
    assert_eq!(records[1].correlation_id, id);
}

#[tokio::test]
async fn client_ip_prefers_forwarded_headers() {
    let app = TestApp::spawn().await;
    let request = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .header("x-real-ip", "10.0.0.2")
        .header("user-agent", "keel-smoke/1.0")
        .body(Body::empty())
        .unwrap();
    app.send(request).await;
    app.get("/health").await;

    let records = app.sink.records();
    assert_eq!(records[0].client_ip, "203.0.113.9");
    assert_eq!(records[0].user_agent, "keel-smoke/1.0");
    assert_eq!(records[1].client_ip, "unknown");
}

#[tokio::test]
async fn client_errors_are_reported_as_warnings() {
    let app = TestApp::spawn().await;
    app.get("/v1/users/404").await;

    let reports = app.reporter.reports();
    assert_eq!(reports.len(), 1);
    match &reports[0] {
        Report::Message {
            message,
            severity,
            context,
        } => {
            assert_eq!(message, "HTTP Error");
            assert_eq!(*severity, Severity::Warning);
            assert_eq!(context["status_code"], 404);
            assert_eq!(context["path"], "/v1/users/404");
        }
        other => panic!("unexpected report: {:?}", other),
    }
    assert!(app.reporter.errors().is_empty());
}

#[tokio::test]
async fn successful_requests_are_not_reported() {
    let app = TestApp::spawn().await;
    app.create_user("ada").await;
    assert!(app.reporter.reports().is_empty());
}

#[tokio::test]
async fn panics_are_captured_once_and_become_500_envelopes() {
    let extra: Router<AppState> = Router::new().route("/v1/explode", get(explode));
    let app = TestApp::build(TestAppOptions {
        extra_routes: Some(extra),
        ..Default::default()
    })
    .await;

    let response = app.get("/v1/explode").await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body["success"], false);
    assert_eq!(response.body["statusCode"], 500);
    assert_eq!(response.body["error"]["code"], "INTERNAL_SERVER_ERROR");

    let errors = app.reporter.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.contains("handler exploded"));
    assert_eq!(errors[0].1["panic"], true);
    assert_eq!(errors[0].1["status_code"], 500);
    assert_eq!(app.reporter.reports().len(), 1);

    let records = app.sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].panicked);
    assert_eq!(records[0].status_code, 500);

    assert!(
        app.journal
            .wait_for("broker.publish", std::time::Duration::from_secs(2))
            .await
    );
    assert_eq!(app.broker.routing_keys(), vec!["system.error".to_string()]);

    // The server keeps serving after a panic.
    assert_eq!(app.get("/health").await.status, StatusCode::OK);
}

#[tokio::test]
async fn oversized_bodies_are_rejected_before_the_handler() {
    let app = TestApp::build(TestAppOptions {
        max_body_bytes: Some(64),
        ..Default::default()
    })
    .await;

    let mut payload = user_payload("ada");
    payload["lastName"] = json!("x".repeat(200));
    let response = app
        .send(json_request(Method::POST, "/v1/users", &payload))
        .await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.body["error"]["code"], "PAYLOAD_TOO_LARGE");
    assert!(app.journal.entries().is_empty());

    let records = app.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status_code, 413);
    assert!(records[0].request_body.is_none());
}

#[tokio::test]
async fn declared_length_over_limit_is_rejected() {
    let app = TestApp::build(TestAppOptions {
        max_body_bytes: Some(16),
        ..Default::default()
    })
    .await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/users")
        .header("content-type", "application/json")
        .header("content-length", "1000")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.sink.records()[0].content_length, Some(1000));
}

#[tokio::test]
async fn metrics_endpoint_exposes_request_counters() {
    let app = TestApp::spawn().await;
    let id = app.create_user("ada").await;
    app.get(&format!("/v1/users/{}", id)).await;

    let response = app.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    let text = response.body.as_str().unwrap();
    assert!(text.contains("keel_http_requests_total"));
    assert!(text.contains("path=\"/v1/users/:id\""));
    assert!(text.contains("keel_cache_lookups_total"));
}

#[tokio::test]
async fn unmatched_paths_share_one_metrics_series() {
    let app = TestApp::spawn().await;
    for path in ["/scan-alpha-7-x", "/scan-beta-9-y", "/scan-alpha-7-x/deeper"] {
        let request = Request::builder()
            .method(Method::TRACE)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.send(request).await.status, StatusCode::NOT_FOUND);
    }

    let response = app.get("/metrics").await;
    let text = response.body.as_str().unwrap();
    assert!(!text.contains("scan-alpha"));
    assert!(!text.contains("scan-beta"));

    let lines = metric_lines(text, "TRACE");
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(lines[0].contains("path=\"unmatched\""));
    assert!(lines[0].contains("status=\"404\""));

    // The raw path still reaches the access log.
    let records = app.sink.records();
    assert_eq!(records[1].path, "/scan-beta-9-y");
    assert_eq!(records[1].route, None);
}

#[tokio::test]
async fn root_span_carries_route_and_http_status() {
    let (app, seen) = span_app().await;
    let response = app.get("/v1/spans/42").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let root = seen.lock().unwrap().pop().unwrap();
    assert!(root.is_finished());
    let spans = root.trace().snapshot();
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0].description, "GET /v1/spans/:id");
    assert_eq!(spans[0].status, Some(SpanStatus::NotFound));
    assert_eq!(spans[0].tags["http.status_code"], "404");

    assert_eq!(spans[1].parent, Some(0));
    assert_eq!(spans[1].status, Some(SpanStatus::Cancelled));
    assert!(spans[1].finished_at.unwrap() <= spans[0].finished_at.unwrap());

    let record = &app.sink.records()[0];
    assert_eq!(record.route.as_deref(), Some("/v1/spans/:id"));
    assert_eq!(record.span_status, Some(SpanStatus::NotFound));
    assert_eq!(record.span_count, 2);
    assert_eq!(record.url_params.as_ref().unwrap()["id"], "42");
}

#[tokio::test]
async fn panicking_route_closes_root_span_as_internal_error() {
    let (app, seen) = span_app().await;
    let response = app.get("/v1/spans/7/explode").await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);

    let root = seen.lock().unwrap().pop().unwrap();
    let spans = root.trace().snapshot();
    assert_eq!(spans[0].description, "GET /v1/spans/:id/explode");
    assert_eq!(spans[0].status, Some(SpanStatus::InternalError));
    assert_eq!(spans[1].status, Some(SpanStatus::Cancelled));
    assert!(spans[1].finished_at.unwrap() <= spans[0].finished_at.unwrap());

    let record = &app.sink.records()[0];
    assert!(record.panicked);
    assert_eq!(record.span_status, Some(SpanStatus::InternalError));
}
