//! Keel API - HTTP Layer
//!
//! Axum routes for user CRUD over the cache-aside repository, wrapped in the
//! request observability pipeline (span tree, redacted access log, error
//! reports, Prometheus metrics) and wired to the best-effort event
//! publisher.
//!
//! Layering, outermost first:
//!
//! 1. `CatchPanicLayer`: the single boundary that turns an unwinding handler
//!    into the standard 500 envelope.
//! 2. [`telemetry::observability_middleware`]: root span, body capture,
//!    redaction, access log, error report (the single capture point for
//!    panics, which it re-raises).
//! 3. Route handlers, which call [`service::UserService`].

pub mod config;
pub mod envelope;
pub mod error;
mod macros;
pub mod redaction;
pub mod routes;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod validation;

pub use config::ApiConfig;
pub use envelope::ApiResponse;
pub use error::{ApiError, ApiResult, ErrorCode, ValidationIssue};
pub use routes::{create_api_router, create_api_router_with};
pub use service::UserService;
pub use state::AppState;
