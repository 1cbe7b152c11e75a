//! Per-request span trees.
//!
//! A [`RequestTrace`] is created with exactly one root span and lives only as
//! long as the request that owns it. Handles are cheap clones pointing into
//! the trace; nothing here is global.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Outcome recorded when a span finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Cancelled,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    InternalError,
    Unknown,
}

impl SpanStatus {
    pub fn from_http(status: u16) -> Self {
        match status {
            200..=399 => SpanStatus::Ok,
            401 => SpanStatus::Unauthenticated,
            403 => SpanStatus::PermissionDenied,
            404 => SpanStatus::NotFound,
            400..=499 => SpanStatus::InvalidArgument,
            500..=u16::MAX => SpanStatus::InternalError,
            _ => SpanStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Ok => "ok",
            SpanStatus::Cancelled => "cancelled",
            SpanStatus::Unauthenticated => "unauthenticated",
            SpanStatus::PermissionDenied => "permission_denied",
            SpanStatus::NotFound => "not_found",
            SpanStatus::InvalidArgument => "invalid_argument",
            SpanStatus::InternalError => "internal_error",
            SpanStatus::Unknown => "unknown",
        }
    }
}

/// Immutable view of one span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub op: String,
    pub description: String,
    pub parent: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: Option<SpanStatus>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug)]
struct SpanSlot {
    op: String,
    description: String,
    parent: Option<usize>,
    started_at: DateTime<Utc>,
    started: Instant,
    finished_at: Option<DateTime<Utc>>,
    elapsed_ms: Option<u64>,
    status: Option<SpanStatus>,
    tags: BTreeMap<String, String>,
}

impl SpanSlot {
    fn open(op: &str, description: &str, parent: Option<usize>) -> Self {
        Self {
            op: op.to_string(),
            description: description.to_string(),
            parent,
            started_at: Utc::now(),
            started: Instant::now(),
            finished_at: None,
            elapsed_ms: None,
            status: None,
            tags: BTreeMap::new(),
        }
    }

    fn is_open(&self) -> bool {
        self.status.is_none()
    }

    fn close(&mut self, status: SpanStatus, at: DateTime<Utc>) {
        self.finished_at = Some(at);
        self.elapsed_ms = Some(u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX));
        self.status = Some(status);
    }

    fn record(&self) -> SpanRecord {
        SpanRecord {
            op: self.op.clone(),
            description: self.description.clone(),
            parent: self.parent,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: self.elapsed_ms,
            status: self.status,
            tags: self.tags.clone(),
        }
    }
}

#[derive(Debug)]
struct TraceInner {
    correlation_id: String,
    spans: Vec<SpanSlot>,
    route: Option<String>,
    url_params: BTreeMap<String, String>,
}

impl TraceInner {
    fn is_descendant(&self, mut index: usize, ancestor: usize) -> bool {
        while let Some(parent) = self.spans[index].parent {
            if parent == ancestor {
                return true;
            }
            index = parent;
        }
        false
    }
}

/// The span tree of a single request.
#[derive(Debug, Clone)]
pub struct RequestTrace {
    inner: Arc<Mutex<TraceInner>>,
}

impl RequestTrace {
    fn lock(&self) -> MutexGuard<'_, TraceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn correlation_id(&self) -> String {
        self.lock().correlation_id.clone()
    }

    /// Matched route pattern, once routing has happened.
    pub fn route(&self) -> Option<String> {
        self.lock().route.clone()
    }

    pub fn url_params(&self) -> BTreeMap<String, String> {
        self.lock().url_params.clone()
    }

    /// Record the matched route and its path parameters.
    pub fn set_route(&self, route: impl Into<String>, url_params: BTreeMap<String, String>) {
        let mut inner = self.lock();
        inner.route = Some(route.into());
        inner.url_params = url_params;
    }

    /// All spans in creation order. Index 0 is the root.
    pub fn snapshot(&self) -> Vec<SpanRecord> {
        self.lock().spans.iter().map(SpanSlot::record).collect()
    }
}

/// Handle to one span inside a [`RequestTrace`].
#[derive(Debug, Clone)]
pub struct SpanHandle {
    trace: RequestTrace,
    index: usize,
}

impl SpanHandle {
    /// Open a new trace whose root is this span.
    pub fn root(correlation_id: impl Into<String>, op: &str, description: &str) -> Self {
        let inner = TraceInner {
            correlation_id: correlation_id.into(),
            spans: vec![SpanSlot::open(op, description, None)],
            route: None,
            url_params: BTreeMap::new(),
        };
        Self {
            trace: RequestTrace {
                inner: Arc::new(Mutex::new(inner)),
            },
            index: 0,
        }
    }

    /// Open a child span. A child of an already-finished span is born
    /// finished as `Cancelled` at the parent's end time.
    pub fn child(&self, op: &str, description: &str) -> SpanHandle {
        let mut inner = self.trace.lock();
        let mut slot = SpanSlot::open(op, description, Some(self.index));
        if let Some(parent_end) = inner.spans[self.index].finished_at {
            slot.close(SpanStatus::Cancelled, parent_end);
        }
        inner.spans.push(slot);
        SpanHandle {
            trace: self.trace.clone(),
            index: inner.spans.len() - 1,
        }
    }

    /// Close this span. Open descendants are closed first as `Cancelled`
    /// with the same end time. Finishing twice does nothing.
    pub fn finish(&self, status: SpanStatus) {
        let mut inner = self.trace.lock();
        if !inner.spans[self.index].is_open() {
            return;
        }
        let now = Utc::now();
        for i in (self.index + 1)..inner.spans.len() {
            if inner.spans[i].is_open() && inner.is_descendant(i, self.index) {
                inner.spans[i].close(SpanStatus::Cancelled, now);
            }
        }
        inner.spans[self.index].close(status, now);

        let span = &inner.spans[self.index];
        tracing::debug!(
            correlation_id = %inner.correlation_id,
            op = %span.op,
            description = %span.description,
            status = status.as_str(),
            duration_ms = span.elapsed_ms.unwrap_or_default(),
            "span finished"
        );
    }

    pub fn is_finished(&self) -> bool {
        !self.trace.lock().spans[self.index].is_open()
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.trace.lock().spans[self.index]
            .tags
            .insert(key.into(), value.into());
    }

    pub fn set_description(&self, description: impl Into<String>) {
        self.trace.lock().spans[self.index].description = description.into();
    }

    pub fn trace(&self) -> &RequestTrace {
        &self.trace
    }
}

/// Entry points used by handlers, which may or may not have a parent span.
pub struct SpanManager;

impl SpanManager {
    /// Child of `parent`, or the root of a fresh trace when there is none.
    pub fn start_span(parent: Option<&SpanHandle>, op: &str, description: &str) -> SpanHandle {
        match parent {
            Some(parent) => parent.child(op, description),
            None => SpanHandle::root(uuid::Uuid::new_v4().to_string(), op, description),
        }
    }

    /// No-op for `None` and for spans that are already finished.
    pub fn finish_span(handle: Option<&SpanHandle>, status: SpanStatus) {
        if let Some(handle) = handle {
            handle.finish(status);
        }
    }
}
