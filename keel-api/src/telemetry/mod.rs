//! Keel Telemetry - Request Observability
//!
//! Span trees, the redacted access log, error reports, Prometheus metrics
//! and subscriber setup. Everything runs in-process.

pub mod log_sink;
pub mod metrics;
pub mod middleware;
pub mod panic;
pub mod reporter;
pub mod spans;
pub mod tracer;

pub use log_sink::{LogRecord, LogSink, MemoryLogSink, TracingLogSink};
pub use metrics::{metrics_handler, KeelMetrics, METRICS};
pub use middleware::{capture_route, normalize_path, observability_middleware, Observability, REQUEST_ID_HEADER};
pub use panic::panic_response;
pub use reporter::{ErrorReporter, MemoryReporter, Report, Severity, TracingReporter};
pub use spans::{RequestTrace, SpanHandle, SpanManager, SpanRecord, SpanStatus};
pub use tracer::{init_tracing, TelemetryConfig};
