//! Prometheus Metrics Definitions
//!
//! Request metrics are recorded by the observability middleware. Cache and
//! event counters live in the repository and publisher; they are copied in
//! when `/metrics` is scraped.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use keel_events::PublisherStats;
use keel_storage::RepositoryStats;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, CounterVec, Encoder,
    HistogramVec, IntCounterVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<KeelMetrics>> = Lazy::new(KeelMetrics::new);

/// Container for all Keel metrics.
#[derive(Clone)]
pub struct KeelMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Cache lookups - labels: outcome (hit, miss, error)
    pub cache_lookups_total: IntCounterVec,

    /// Event deliveries - labels: outcome (published, failed, dropped)
    pub events_total: IntCounterVec,
}

impl KeelMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "keel_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "keel_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            cache_lookups_total: register_int_counter_vec!(
                "keel_cache_lookups_total",
                "Cache lookups by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_lookups_total: {}", e)))?,

            events_total: register_int_counter_vec!(
                "keel_events_total",
                "Domain events by delivery outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register events_total: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Bring the cache counters up to the repository's totals.
    pub fn observe_repository(&self, stats: RepositoryStats) {
        catch_up(&self.cache_lookups_total, "hit", stats.hits);
        catch_up(&self.cache_lookups_total, "miss", stats.misses);
        catch_up(&self.cache_lookups_total, "error", stats.cache_errors);
    }

    /// Bring the event counters up to the publisher's totals.
    pub fn observe_publisher(&self, stats: PublisherStats) {
        catch_up(&self.events_total, "published", stats.published);
        catch_up(&self.events_total, "failed", stats.failed);
        catch_up(&self.events_total, "dropped", stats.dropped);
    }
}

// Counters only move forward.
fn catch_up(counter: &IntCounterVec, outcome: &str, total: u64) {
    let counter = counter.with_label_values(&[outcome]);
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.observe_repository(state.users.repository().stats());
        metrics.observe_publisher(state.events.stats());
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
