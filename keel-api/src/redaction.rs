//! Redaction policy for logged request data.
//!
//! Header names and body text are matched case-insensitively by substring
//! against fixed lists. A sensitive header keeps its name and loses its
//! value. A body containing any sensitive substring is replaced as a whole;
//! there is no field-level redaction.

use axum::http::HeaderMap;
use std::collections::BTreeMap;

/// Replacement for a sensitive header value.
pub const REDACTED: &str = "[REDACTED]";

/// Replacement for a body that mentions anything sensitive.
pub const SENSITIVE_BODY: &str = "[CONTAINS SENSITIVE DATA]";

/// Appended to a body cut at the character budget.
pub const TRUNCATED_MARKER: &str = "... [TRUNCATED]";

const SENSITIVE_HEADER_PARTS: &[&str] = &[
    "authorization",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "password",
    "token",
    "secret",
    "key",
    "auth",
    "credential",
];

const SENSITIVE_BODY_PARTS: &[&str] = &["password", "token", "secret", "key", "auth", "credential"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}

pub fn is_sensitive_header(name: &str) -> bool {
    contains_any(name, SENSITIVE_HEADER_PARTS)
}

pub fn body_contains_sensitive_data(body: &str) -> bool {
    contains_any(body, SENSITIVE_BODY_PARTS)
}

/// Header map for logging. Repeated headers are joined with `", "`.
pub fn redact_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in headers.keys() {
        let rendered = if is_sensitive_header(name.as_str()) {
            REDACTED.to_string()
        } else {
            headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ")
        };
        out.insert(name.as_str().to_string(), rendered);
    }
    out
}

/// Cut `body` to `max_chars` characters and append the marker. The result
/// never exceeds `max_chars` plus the marker, and cutting an already cut
/// text again yields the same text.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &body[..cut], TRUNCATED_MARKER),
        None => body.to_string(),
    }
}

/// Loggable form of a request body: `None` when empty, otherwise the
/// truncated text or [`SENSITIVE_BODY`]. Truncation runs before the scan.
pub fn render_body(bytes: &[u8], max_chars: usize) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let truncated = truncate_body(&text, max_chars);
    if body_contains_sensitive_data(&truncated) {
        Some(SENSITIVE_BODY.to_string())
    } else {
        Some(truncated)
    }
}
