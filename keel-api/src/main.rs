//! Keel API Server Entry Point
//!
//! Boot order: configuration, tracing, entity store, cache, event publisher,
//! router. Shutdown stops accepting connections, then drains the publisher.

use std::net::SocketAddr;
use std::sync::Arc;

use keel_api::telemetry::{init_tracing, Observability, TelemetryConfig};
use keel_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState, UserService};
use keel_core::Sha256PasswordHasher;
use keel_events::{
    EventPublisher, InMemoryBroker, MessageBroker, PublisherConfig, RedisStreamBroker,
    RedisStreamConfig,
};
use keel_storage::{
    CacheConfig, CacheStore, CachedUserRepository, InMemoryCacheStore, InMemoryEntityStore,
    RedisCacheConfig, RedisCacheStore,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = ApiConfig::from_env();
    init_tracing(&TelemetryConfig::from(&config))?;

    let store = Arc::new(InMemoryEntityStore::new());
    let cache = connect_cache(&config).await;
    let repo = CachedUserRepository::new(store, cache)
        .with_config(CacheConfig::new().with_ttl(config.cache_ttl))
        .with_store_timeout(config.io_timeout);

    let events = start_publisher(&config).await;
    let users = UserService::new(repo, events.clone(), Arc::new(Sha256PasswordHasher));
    let state = AppState::new(users, Observability::from_config(&config))
        .with_version(config.version.clone())
        .with_environment(config.environment.clone());

    let app = create_api_router(state, &config);

    let addr = config.bind_addr;
    tracing::info!(%addr, environment = %config.environment, "Starting Keel API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    events.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Redis when configured and reachable, otherwise the in-process cache.
async fn connect_cache(config: &ApiConfig) -> Arc<dyn CacheStore> {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!("KEEL_REDIS_URL not set, using in-memory cache");
        return Arc::new(InMemoryCacheStore::new());
    };

    let redis_config = RedisCacheConfig {
        key_prefix: "keel:".to_string(),
        operation_timeout: config.io_timeout,
    };
    match RedisCacheStore::connect(url, redis_config).await {
        Ok(cache) => {
            tracing::info!("Redis cache connected");
            Arc::new(cache)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to Redis, using in-memory cache");
            Arc::new(InMemoryCacheStore::new())
        }
    }
}

/// A publisher that is disabled when the broker cannot be reached.
async fn start_publisher(config: &ApiConfig) -> EventPublisher {
    let publisher_config = PublisherConfig::default()
        .with_exchange(config.event_exchange.clone())
        .with_queue_capacity(config.event_queue_capacity)
        .with_publish_timeout(config.io_timeout);

    let broker: Arc<dyn MessageBroker> = match config.broker_url.as_deref() {
        None => {
            tracing::info!("KEEL_BROKER_URL not set, using in-memory broker");
            Arc::new(InMemoryBroker::default())
        }
        Some(url) => {
            let stream_config = RedisStreamConfig {
                operation_timeout: config.io_timeout,
                ..RedisStreamConfig::default()
            };
            match RedisStreamBroker::connect(url, stream_config).await {
                Ok(broker) => Arc::new(broker),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to connect to broker, continuing without events");
                    return EventPublisher::disabled(config.event_exchange.clone());
                }
            }
        }
    };

    EventPublisher::start(broker, publisher_config).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
