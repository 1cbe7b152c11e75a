//! Router harness shared by the HTTP-level tests.
//!
//! Builds the full middleware stack over journaled in-memory backends and
//! in-memory log/report sinks, then drives it with `oneshot`.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use keel_api::telemetry::{MemoryLogSink, MemoryReporter, Observability};
use keel_api::{create_api_router_with, ApiConfig, AppState, UserService};
use keel_core::Sha256PasswordHasher;
use keel_events::{EventPublisher, MessageBroker, PublisherConfig};
use keel_storage::{CacheStore, CachedUserRepository, EntityStore};
use keel_test_utils::{Journal, RecordingBroker, RecordingCacheStore, RecordingEntityStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub journal: Journal,
    pub store: RecordingEntityStore,
    pub cache: RecordingCacheStore,
    pub broker: RecordingBroker,
    pub events: EventPublisher,
    pub sink: MemoryLogSink,
    pub reporter: MemoryReporter,
}

/// Overrides for [`TestApp::build`]. Unset backends are the recording ones.
#[derive(Default)]
pub struct TestAppOptions {
    pub store: Option<Arc<dyn EntityStore>>,
    pub cache: Option<Arc<dyn CacheStore>>,
    pub broker: Option<Arc<dyn MessageBroker>>,
    pub disabled_events: bool,
    pub extra_routes: Option<Router<AppState>>,
    pub max_body_bytes: Option<usize>,
    pub body_log_limit: Option<usize>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::build(TestAppOptions::default()).await
    }

    pub async fn build(options: TestAppOptions) -> Self {
        let journal = Journal::new();
        let store = RecordingEntityStore::new(journal.clone());
        let cache = RecordingCacheStore::new(journal.clone());
        let broker = RecordingBroker::new(journal.clone());

        let repo = CachedUserRepository::new(
            options
                .store
                .unwrap_or_else(|| Arc::new(store.clone())),
            options
                .cache
                .unwrap_or_else(|| Arc::new(cache.clone())),
        )
        .with_store_timeout(Duration::from_millis(500));

        let events = if options.disabled_events {
            EventPublisher::disabled("api_exchange")
        } else {
            let broker: Arc<dyn MessageBroker> = options
                .broker
                .unwrap_or_else(|| Arc::new(broker.clone()));
            EventPublisher::start(broker, PublisherConfig::default()).await
        };

        let sink = MemoryLogSink::new();
        let reporter = MemoryReporter::new();
        let mut observability =
            Observability::new(Arc::new(sink.clone()), Arc::new(reporter.clone()));
        if let Some(limit) = options.max_body_bytes {
            observability = observability.with_max_body_bytes(limit);
        }
        if let Some(limit) = options.body_log_limit {
            observability = observability.with_body_log_limit(limit);
        }

        let users = UserService::new(repo, events.clone(), Arc::new(Sha256PasswordHasher));
        let state = AppState::new(users, observability)
            .with_version("9.9.9-test")
            .with_environment("test");
        let router = create_api_router_with(
            state,
            &ApiConfig::default(),
            options.extra_routes.unwrap_or_default(),
        );

        Self {
            router,
            journal,
            store,
            cache,
            broker,
            events,
            sink,
            reporter,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body is readable");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(empty_request(Method::GET, uri)).await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        self.send(empty_request(Method::DELETE, uri)).await
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> TestResponse {
        self.send(json_request(Method::POST, uri, body)).await
    }

    pub async fn put_json(&self, uri: &str, body: &Value) -> TestResponse {
        self.send(json_request(Method::PUT, uri, body)).await
    }

    /// POST a valid user and return its id.
    pub async fn create_user(&self, username: &str) -> i64 {
        let response = self.post_json("/v1/users", &user_payload(username)).await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["data"]["id"]
            .as_i64()
            .expect("created user has an id")
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

pub fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub fn user_payload(username: &str) -> Value {
    serde_json::json!({
        "username": username,
        "email": format!("{}@example.com", username),
        "password": "hunter22",
        "firstName": "Ada",
        "lastName": "Lovelace",
    })
}
