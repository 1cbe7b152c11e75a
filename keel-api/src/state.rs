//! Shared application state for Axum routers.

use keel_events::EventPublisher;
use std::time::Instant;

use crate::service::UserService;
use crate::telemetry::Observability;

/// Application-wide state shared across all routes. Every collaborator is
/// constructed at startup and injected here.
#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    /// Same publisher the user service holds; used for system events.
    pub events: EventPublisher,
    pub observability: Observability,
    pub start_time: Instant,
    pub version: String,
    pub environment: String,
}

impl AppState {
    pub fn new(users: UserService, observability: Observability) -> Self {
        Self {
            events: users.events().clone(),
            users,
            observability,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }
}

crate::impl_from_ref!(UserService, users);
crate::impl_from_ref!(EventPublisher, events);
crate::impl_from_ref!(Observability, observability);
