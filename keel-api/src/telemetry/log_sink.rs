//! Structured access log.

use serde::Serialize;
use std::collections::BTreeMap;

use super::spans::SpanStatus;
use std::sync::{Arc, Mutex, PoisonError};

/// One record per request, written once after the response is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub query_params: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub client_ip: String,
    pub user_agent: String,
    pub content_type: String,
    pub content_length: Option<u64>,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_params: Option<BTreeMap<String, String>>,
    /// Matched route pattern, absent when no route matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Final status of the request's root span.
    pub span_status: Option<SpanStatus>,
    pub span_count: usize,
    pub correlation_id: String,
    pub response_size: Option<u64>,
    /// Set when the handler unwound instead of returning.
    pub panicked: bool,
}

impl LogRecord {
    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }

    pub fn message(&self) -> &'static str {
        if self.is_error() {
            "HTTP Request Error"
        } else {
            "HTTP Request"
        }
    }
}

/// Destination for access log records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: LogRecord);
}

/// Writes records through `tracing`: error level at status 400 and above,
/// info below.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, record: LogRecord) {
        let headers = serde_json::to_string(&record.headers).unwrap_or_default();
        let url_params = record
            .url_params
            .as_ref()
            .and_then(|p| serde_json::to_string(p).ok());

        macro_rules! access_log {
            ($level:ident) => {
                tracing::$level!(
                    target: "keel_api::access",
                    timestamp = %record.timestamp,
                    method = %record.method,
                    path = %record.path,
                    query_params = %record.query_params,
                    status_code = record.status_code,
                    duration_ms = record.duration_ms,
                    client_ip = %record.client_ip,
                    user_agent = %record.user_agent,
                    content_type = %record.content_type,
                    content_length = ?record.content_length,
                    headers = %headers,
                    request_body = ?record.request_body,
                    url_params = ?url_params,
                    route = ?record.route,
                    span_status = record.span_status.map(|s| s.as_str()).unwrap_or("open"),
                    span_count = record.span_count,
                    correlation_id = %record.correlation_id,
                    response_size = ?record.response_size,
                    panicked = record.panicked,
                    "{}",
                    record.message()
                )
            };
        }

        if record.is_error() {
            access_log!(error);
        } else {
            access_log!(info);
        }
    }
}

/// Collects records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogSink for MemoryLogSink {
    fn emit(&self, record: LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
