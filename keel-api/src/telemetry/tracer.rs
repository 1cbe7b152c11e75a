//! Tracing Subscriber Initialization

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ApiConfig, LogFormat};
use crate::error::{ApiError, ApiResult};

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("KEEL_SERVICE_NAME")
                .unwrap_or_else(|_| "keel-api".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::Json,
            default_filter: "keel_api=debug,keel_storage=info,keel_events=info,tower_http=debug,info"
                .to_string(),
        }
    }
}

impl From<&ApiConfig> for TelemetryConfig {
    fn from(config: &ApiConfig) -> Self {
        Self {
            service_version: config.version.clone(),
            environment: config.environment.clone(),
            log_format: config.log_format,
            ..Self::default()
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call fails because a subscriber is
/// already installed.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };
    installed.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        service_version = %config.service_version,
        environment = %config.environment,
        "Telemetry initialized"
    );

    Ok(())
}
