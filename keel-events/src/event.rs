//! Domain event envelope.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Top-level routing key segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    User,
    System,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::User => "user",
            EventCategory::System => "system",
        }
    }

    /// `{category}.{event_type}`
    pub fn routing_key(&self, event_type: &str) -> String {
        format!("{}.{}", self.as_str(), event_type)
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message body published for every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<i64>,
    pub data: Value,
    /// Unix seconds at emission.
    pub timestamp: i64,
}

impl DomainEvent {
    pub fn new(event_type: impl Into<String>, subject_id: Option<i64>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            subject_id,
            data,
            timestamp: Utc::now().timestamp(),
        }
    }
}
