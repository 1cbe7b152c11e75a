//! Health Check Endpoint
//!
//! `GET /health` probes the entity store and cache, reports the publisher's
//! state, and emits a `system.health_check` event. No authentication.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use chrono::{SecondsFormat, Utc};
use keel_core::KeelResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

use crate::envelope::ApiResponse;
use crate::service::log_publish_outcome;
use crate::state::AppState;

/// Upper bound for each component probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: Option<u64>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms,
            error: None,
        }
    }

    fn failing(status: HealthStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            latency_ms: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub database: ComponentHealth,
    pub cache: ComponentHealth,
    pub broker: ComponentHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    /// Seconds since the service started.
    pub uptime: u64,
    pub version: String,
    pub environment: String,
    pub services: ServiceHealth,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn probe<F>(check: F) -> Result<u64, String>
where
    F: Future<Output = KeelResult<()>>,
{
    let start = Instant::now();
    match tokio::time::timeout(PROBE_TIMEOUT, check).await {
        Ok(Ok(())) => Ok(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("timed out".to_string()),
    }
}

/// The store is required; the cache and broker only degrade the service.
fn overall(services: &ServiceHealth) -> HealthStatus {
    if services.database.status != HealthStatus::Healthy {
        HealthStatus::Unhealthy
    } else if services.cache.status != HealthStatus::Healthy
        || services.broker.status != HealthStatus::Healthy
    {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResponse<HealthReport> {
    let repo = state.users.repository();

    let database = match probe(repo.store().ping()).await {
        Ok(latency) => ComponentHealth::healthy(Some(latency)),
        Err(e) => ComponentHealth::failing(HealthStatus::Unhealthy, e),
    };
    let cache = match probe(repo.cache().ping()).await {
        Ok(latency) => ComponentHealth::healthy(Some(latency)),
        Err(e) => ComponentHealth::failing(HealthStatus::Degraded, e),
    };
    let broker = if state.events.is_enabled() {
        ComponentHealth::healthy(None)
    } else {
        ComponentHealth::failing(HealthStatus::Degraded, "event publishing disabled")
    };

    let services = ServiceHealth {
        database,
        cache,
        broker,
    };
    let report = HealthReport {
        status: overall(&services),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        uptime: state.start_time.elapsed().as_secs(),
        version: state.version.clone(),
        environment: state.environment.clone(),
        services,
    };

    log_publish_outcome(
        "health_check",
        state.events.publish_system_event(
            "health_check",
            &serde_json::json!({ "status": report.status, "version": report.version }),
        ),
    );

    if report.status == HealthStatus::Unhealthy {
        let mut response =
            ApiResponse::with_status(StatusCode::SERVICE_UNAVAILABLE, "Service is unhealthy", Some(report));
        response.success = false;
        response
    } else {
        ApiResponse::ok("Service is healthy", report)
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(status: HealthStatus) -> ComponentHealth {
        ComponentHealth {
            status,
            latency_ms: None,
            error: None,
        }
    }

    #[test]
    fn database_failure_is_unhealthy() {
        let services = ServiceHealth {
            database: component(HealthStatus::Unhealthy),
            cache: component(HealthStatus::Healthy),
            broker: component(HealthStatus::Healthy),
        };
        assert_eq!(overall(&services), HealthStatus::Unhealthy);
    }

    #[test]
    fn cache_or_broker_failure_degrades() {
        let services = ServiceHealth {
            database: component(HealthStatus::Healthy),
            cache: component(HealthStatus::Healthy),
            broker: component(HealthStatus::Degraded),
        };
        assert_eq!(overall(&services), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn probe_reports_timeouts() {
        tokio::time::pause();
        let result = probe(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err("timed out".to_string()));
    }
}
