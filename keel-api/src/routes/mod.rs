//! REST API Routes Module
//!
//! Assembles the user, health and metrics routes and wraps them in the
//! middleware stack.

pub mod health;
pub mod user;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use std::time::Duration;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
};

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::state::AppState;
use crate::telemetry::{
    capture_route, metrics_handler, observability_middleware, panic_response, REQUEST_ID_HEADER,
};

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("Route")
}

/// Build the full application router.
///
/// Layers, outermost first: panic boundary, CORS, observability. The
/// route-level `capture_route` layer records the matched pattern.
pub fn create_api_router(state: AppState, api_config: &ApiConfig) -> Router {
    create_api_router_with(state, api_config, Router::new())
}

/// Like [`create_api_router`], with extra routes mounted under the same
/// middleware stack.
pub fn create_api_router_with(
    state: AppState,
    api_config: &ApiConfig,
    extra: Router<AppState>,
) -> Router {
    let observability = state.observability.clone().with_events(state.events.clone());

    Router::new()
        .merge(user::create_router())
        .merge(health::create_router())
        .merge(extra)
        .route("/metrics", get(metrics_handler))
        .route_layer(from_fn(capture_route))
        .fallback(route_not_found)
        .with_state(state)
        .layer(from_fn_with_state(observability, observability_middleware))
        .layer(build_cors_layer(api_config))
        .layer(CatchPanicLayer::custom(panic_response))
}
