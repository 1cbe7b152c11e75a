//! Error reporting channel.
//!
//! Reports are how the request pipeline tells operators that something went
//! wrong: error-level responses, and panics captured by the middleware.

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Report severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// 5xx is an error, 4xx a warning, anything else informational.
    pub fn from_http(status: u16) -> Self {
        match status {
            500..=u16::MAX => Severity::Error,
            400..=499 => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Sink for error reports.
pub trait ErrorReporter: Send + Sync {
    /// An error or panic, with request context.
    fn capture_error(&self, error: &str, context: &Value);

    /// A notable message at the given severity.
    fn capture_message(&self, message: &str, severity: Severity, context: &Value);
}

/// Reports as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture_error(&self, error: &str, context: &Value) {
        tracing::error!(report = "error", error = error, context = %context, "Error captured");
    }

    fn capture_message(&self, message: &str, severity: Severity, context: &Value) {
        match severity {
            Severity::Error => {
                tracing::error!(report = "message", severity = severity.as_str(), context = %context, "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(report = "message", severity = severity.as_str(), context = %context, "{}", message)
            }
            Severity::Info => {
                tracing::info!(report = "message", severity = severity.as_str(), context = %context, "{}", message)
            }
        }
    }
}

/// One captured report.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Error { error: String, context: Value },
    Message { message: String, severity: Severity, context: Value },
}

/// Keeps reports in memory. Used by tests and local tooling.
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    reports: Arc<Mutex<Vec<Report>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn errors(&self) -> Vec<(String, Value)> {
        self.reports()
            .into_iter()
            .filter_map(|r| match r {
                Report::Error { error, context } => Some((error, context)),
                Report::Message { .. } => None,
            })
            .collect()
    }

    fn push(&self, report: Report) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }
}

impl ErrorReporter for MemoryReporter {
    fn capture_error(&self, error: &str, context: &Value) {
        self.push(Report::Error {
            error: error.to_string(),
            context: context.clone(),
        });
    }

    fn capture_message(&self, message: &str, severity: Severity, context: &Value) {
        self.push(Report::Message {
            message: message.to_string(),
            severity,
            context: context.clone(),
        });
    }
}
