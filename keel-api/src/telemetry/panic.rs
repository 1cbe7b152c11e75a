//! Top-level panic boundary.
//!
//! `CatchPanicLayer` calls [`panic_response`] for any handler that unwinds.
//! The observability middleware has already reported the panic by then, so
//! this only builds the client response.

use axum::response::{IntoResponse, Response};
use std::any::Any;

use crate::error::ApiError;

/// 500 envelope for an unwinding request.
pub fn panic_response(_payload: Box<dyn Any + Send + 'static>) -> Response {
    ApiError::internal_error("Internal server error occurred").into_response()
}

/// Readable text from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
