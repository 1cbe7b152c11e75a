//! API Configuration Module
//!
//! Runtime settings for the HTTP service, its collaborators and the request
//! observability pipeline. Loaded from environment variables with defaults
//! suitable for local development.

use std::net::SocketAddr;
use std::time::Duration;

/// Default character budget for logged request bodies.
pub const DEFAULT_LOG_BODY_LIMIT: usize = 1000;

/// Default upper bound for a buffered request body (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Listen address. `KEEL_BIND` wins over `PORT`.
    pub bind_addr: SocketAddr,

    /// Redis URL for the cache. `None` selects the in-process cache.
    pub redis_url: Option<String>,

    /// Redis URL for the event broker. `None` selects the in-process broker.
    pub broker_url: Option<String>,

    /// Exchange the publisher declares and publishes to.
    pub event_exchange: String,

    /// Capacity of the publisher's work queue.
    pub event_queue_capacity: usize,

    /// TTL for cached entities.
    pub cache_ttl: Duration,

    /// Timeout applied at every collaborator boundary.
    pub io_timeout: Duration,

    /// Character budget for logged request bodies.
    pub log_body_limit: usize,

    /// Largest request body the middleware will buffer.
    pub max_body_bytes: usize,

    /// Deployment environment (development, staging, production).
    pub environment: String,

    pub log_format: LogFormat,

    /// Version reported by the health endpoint.
    pub version: String,

    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            redis_url: None,
            broker_url: None,
            event_exchange: "api_exchange".to_string(),
            event_queue_capacity: 1024,
            cache_ttl: Duration::from_secs(3600),
            io_timeout: Duration::from_millis(2000),
            log_body_limit: DEFAULT_LOG_BODY_LIMIT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            environment: "development".to_string(),
            log_format: LogFormat::Json,
            version: env!("CARGO_PKG_VERSION").to_string(),
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `KEEL_BIND`: Full listen address, e.g. `127.0.0.1:3000`
    /// - `PORT`: Port on 0.0.0.0 when `KEEL_BIND` is unset (default: 8080)
    /// - `KEEL_REDIS_URL`: Cache Redis URL (unset = in-memory cache)
    /// - `KEEL_BROKER_URL`: Broker Redis URL (unset = in-memory broker)
    /// - `KEEL_EVENT_EXCHANGE`: Exchange name (default: api_exchange)
    /// - `KEEL_EVENT_QUEUE_CAPACITY`: Publisher queue size (default: 1024)
    /// - `KEEL_CACHE_TTL_SECS`: Cache entry TTL (default: 3600)
    /// - `KEEL_IO_TIMEOUT_MS`: Collaborator call timeout (default: 2000)
    /// - `KEEL_LOG_BODY_LIMIT`: Logged body budget in chars (default: 1000)
    /// - `KEEL_MAX_BODY_BYTES`: Buffered body limit (default: 1048576)
    /// - `KEEL_ENVIRONMENT`: Deployment environment (default: development)
    /// - `KEEL_LOG_FORMAT`: "json" or "pretty" (default: json)
    /// - `APP_VERSION`: Reported version (default: crate version)
    /// - `KEEL_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `KEEL_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = std::env::var("KEEL_BIND")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| {
                std::env::var("PORT")
                    .ok()
                    .and_then(|s| s.parse::<u16>().ok())
                    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
            })
            .unwrap_or(defaults.bind_addr);

        Self {
            bind_addr,
            redis_url: non_empty_var("KEEL_REDIS_URL"),
            broker_url: non_empty_var("KEEL_BROKER_URL"),
            event_exchange: non_empty_var("KEEL_EVENT_EXCHANGE")
                .unwrap_or(defaults.event_exchange),
            event_queue_capacity: parsed_var("KEEL_EVENT_QUEUE_CAPACITY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.event_queue_capacity),
            cache_ttl: parsed_var("KEEL_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            io_timeout: parsed_var("KEEL_IO_TIMEOUT_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.io_timeout),
            log_body_limit: parsed_var("KEEL_LOG_BODY_LIMIT").unwrap_or(defaults.log_body_limit),
            max_body_bytes: parsed_var("KEEL_MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            environment: non_empty_var("KEEL_ENVIRONMENT").unwrap_or(defaults.environment),
            log_format: std::env::var("KEEL_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.log_format),
            version: non_empty_var("APP_VERSION").unwrap_or(defaults.version),
            cors_origins: std::env::var("KEEL_CORS_ORIGINS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            cors_max_age_secs: parsed_var("KEEL_CORS_MAX_AGE_SECS")
                .unwrap_or(defaults.cors_max_age_secs),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
