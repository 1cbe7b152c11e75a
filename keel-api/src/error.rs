//! Error Types for the Keel API
//!
//! Every failure leaves the service as the standard error envelope:
//!
//! ```json
//! {
//!   "success": false,
//!   "statusCode": 404,
//!   "message": "User not found",
//!   "error": { "code": "NOT_FOUND", "message": "User not found", "timestamp": "..." }
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use keel_core::{EntityType, KeelError, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    ValidationError,
    BadRequest,
    NotFound,
    Conflict,
    PayloadTooLarge,
    DatabaseError,
    InternalServerError,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::ValidationError | ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DatabaseError | ErrorCode::InternalServerError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "Access denied",
            ErrorCode::ValidationError => "Request validation failed",
            ErrorCode::BadRequest => "Bad request",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::Conflict => "Resource already exists",
            ErrorCode::PayloadTooLarge => "Request body too large",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::InternalServerError => "Internal server error occurred",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Structured error returned by every handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Operator-facing detail, e.g. the underlying store error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<ValidationIssue>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            validations: Vec::new(),
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// `VALIDATION_ERROR` carrying the individual field failures.
    pub fn validation(validations: Vec<ValidationIssue>) -> Self {
        Self {
            code: ErrorCode::ValidationError,
            message: "Validation failed".to_string(),
            details: None,
            validations,
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found", resource))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            ErrorCode::PayloadTooLarge,
            format!("Request body exceeds {} bytes", limit),
        )
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Map a repository error, using `action` ("Failed to create user") as
    /// the client message for store failures.
    pub fn from_store(err: KeelError, action: &str) -> Self {
        match &err {
            KeelError::Storage(StorageError::NotFound { entity_type, .. }) => {
                Self::not_found(resource_name(*entity_type))
            }
            KeelError::Storage(StorageError::Conflict { reason, .. }) => Self::conflict(reason.clone()),
            KeelError::Storage(
                StorageError::Unavailable { .. } | StorageError::Timeout { .. },
            ) => Self::service_unavailable(action).with_details(err.to_string()),
            KeelError::Storage(_) => Self::database(action).with_details(err.to_string()),
            KeelError::Cache(_) => Self::internal_error(action).with_details(err.to_string()),
        }
    }
}

fn resource_name(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::User => "User",
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<KeelError> for ApiError {
    fn from(err: KeelError) -> Self {
        Self::from_store(err, ErrorCode::DatabaseError.default_message())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {}", err))
    }
}

// ============================================================================
// RESPONSE ENVELOPE
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorInfo<'a> {
    code: ErrorCode,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
    #[serde(skip_serializing_if = "no_issues")]
    validations: &'a [ValidationIssue],
    timestamp: String,
}

fn no_issues(validations: &&[ValidationIssue]) -> bool {
    validations.is_empty()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope<'a> {
    success: bool,
    status_code: u16,
    message: &'a str,
    error: ErrorInfo<'a>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Validation failures keep the short headline and the long inner text.
        let inner_message = if self.code == ErrorCode::ValidationError {
            self.code.default_message()
        } else {
            &self.message
        };
        let envelope = ErrorEnvelope {
            success: false,
            status_code: status.as_u16(),
            message: &self.message,
            error: ErrorInfo {
                code: self.code,
                message: inner_message,
                details: self.details.as_deref(),
                validations: &self.validations,
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        };
        (status, Json(envelope)).into_response()
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn codes_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::NotFound).unwrap(),
            "\"NOT_FOUND\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::InternalServerError).unwrap(),
            "\"INTERNAL_SERVER_ERROR\""
        );
        assert_eq!(ErrorCode::DatabaseError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn envelope_shape() {
        let (status, body) = body_json(ApiError::not_found("User")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["statusCode"], 404);
        assert_eq!(body["message"], "User not found");
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert!(body["error"]["timestamp"].is_string());
        assert!(body["error"].get("details").is_none());
        assert!(body["error"].get("validations").is_none());
    }

    #[tokio::test]
    async fn validation_envelope_lists_fields() {
        let err = ApiError::validation(vec![
            ValidationIssue::new("username", "too short").with_value("ab")
        ]);
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Validation failed");
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["message"], "Request validation failed");
        assert_eq!(body["error"]["validations"][0]["field"], "username");
        assert_eq!(body["error"]["validations"][0]["value"], "ab");
    }

    #[test]
    fn store_errors_map_to_codes() {
        let not_found = ApiError::from_store(
            StorageError::NotFound {
                entity_type: EntityType::User,
                id: "1".into(),
            }
            .into(),
            "Failed to retrieve user",
        );
        assert_eq!(not_found.code, ErrorCode::NotFound);
        assert_eq!(not_found.message, "User not found");

        let failed = ApiError::from_store(
            StorageError::InsertFailed {
                entity_type: EntityType::User,
                reason: "disk full".into(),
            }
            .into(),
            "Failed to create user",
        );
        assert_eq!(failed.code, ErrorCode::DatabaseError);
        assert_eq!(failed.message, "Failed to create user");
        assert!(failed.details.unwrap().contains("disk full"));

        let timeout = ApiError::from_store(
            StorageError::Timeout {
                operation: "user_get".into(),
            }
            .into(),
            "Failed to retrieve user",
        );
        assert_eq!(timeout.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
