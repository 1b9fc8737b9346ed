pub mod config;
pub mod error;
pub mod provider;

pub use config::{
    Config, LocationConfig, PollingConfig, SourceConfig, StoreConfig, ValidationResult,
    WeatherConfig,
};
pub use error::{
    AppError, ConfigError, DatabaseError, NetworkError, RequestErrorType, UserAction, WeatherError,
};
pub use provider::{LocationProviderKind, WeatherSource};

use anyhow::Result;

/// Initialize logging for the application
pub fn init() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Nimbus core initialized");
    Ok(())
}
