use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::provider::{LocationProviderKind, WeatherSource};

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Positioning settings
    #[serde(default)]
    pub location: LocationConfig,

    /// Weather source settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Background refresh settings
    #[serde(default)]
    pub polling: PollingConfig,

    /// Saved locations database
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Backend used to resolve the current position
    #[serde(default)]
    pub provider: LocationProviderKind,

    /// Per-provider timeout before falling back to the last known position
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Overall bound on one location resolution
    #[serde(default = "default_acquisition_timeout")]
    pub acquisition_timeout_secs: u64,

    /// Race a GPS-accuracy fix against the network-accuracy one
    #[serde(default = "default_true")]
    pub use_gps: bool,

    /// Baidu Maps application key (Baidu and Baidu IP providers)
    #[serde(default)]
    pub baidu_ak: Option<String>,

    #[serde(default = "default_baidu_url")]
    pub baidu_base_url: String,

    /// AMap web service key
    #[serde(default)]
    pub amap_key: Option<String>,

    #[serde(default = "default_amap_url")]
    pub amap_base_url: String,
}

fn default_provider_timeout() -> u64 {
    10
}

fn default_acquisition_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_baidu_url() -> String {
    "https://api.map.baidu.com".to_string()
}

fn default_amap_url() -> String {
    "https://restapi.amap.com".to_string()
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            provider: LocationProviderKind::default(),
            provider_timeout_secs: default_provider_timeout(),
            acquisition_timeout_secs: default_acquisition_timeout(),
            use_gps: true,
            baidu_ak: None,
            baidu_base_url: default_baidu_url(),
            amap_key: None,
            amap_base_url: default_amap_url(),
        }
    }
}

/// Endpoint and credential overrides for one weather source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Overrides the production endpoint (testing, proxies)
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key or token, for sources that need one
    #[serde(default)]
    pub api_key: Option<String>,
}

impl SourceConfig {
    /// Returns the API key unless it is empty or still a placeholder.
    pub fn key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty() && !k.starts_with("YOUR_"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Source bound to the current-position location and new searches
    #[serde(default)]
    pub default_source: WeatherSource,

    /// Language sent to providers (e.g. "en", "zh")
    #[serde(default = "default_language")]
    pub language: String,

    /// Daily forecast window requested from sources (clamped per source)
    #[serde(default = "default_daily_days")]
    pub daily_days: u8,

    /// Hourly forecast window requested from sources (clamped per source)
    #[serde(default = "default_hourly_hours")]
    pub hourly_hours: u16,

    /// User-Agent sent with every request; MET Norway rejects anonymous clients
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries for timeouts, connection errors and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_geocoding_url")]
    pub geocoding_url: String,

    #[serde(default = "default_air_quality_url")]
    pub air_quality_url: String,

    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,

    #[serde(default)]
    pub open_meteo: SourceConfig,

    #[serde(default)]
    pub metno: SourceConfig,

    #[serde(default)]
    pub accu: SourceConfig,

    #[serde(default)]
    pub caiyun: SourceConfig,

    #[serde(default)]
    pub cn: SourceConfig,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_daily_days() -> u8 {
    16
}

fn default_hourly_hours() -> u16 {
    24
}

fn default_user_agent() -> String {
    format!("nimbus/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_geocoding_url() -> String {
    "https://geocoding-api.open-meteo.com".to_string()
}

fn default_air_quality_url() -> String {
    "https://air-quality-api.open-meteo.com".to_string()
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            default_source: WeatherSource::default(),
            language: default_language(),
            daily_days: default_daily_days(),
            hourly_hours: default_hourly_hours(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            geocoding_url: default_geocoding_url(),
            air_quality_url: default_air_quality_url(),
            nominatim_url: default_nominatim_url(),
            open_meteo: SourceConfig::default(),
            metno: SourceConfig::default(),
            accu: SourceConfig::default(),
            caiyun: SourceConfig::default(),
            cn: SourceConfig::default(),
        }
    }
}

impl WeatherConfig {
    /// Settings for one source.
    pub fn source(&self, source: WeatherSource) -> &SourceConfig {
        match source {
            WeatherSource::OpenMeteo => &self.open_meteo,
            WeatherSource::MetNo => &self.metno,
            WeatherSource::Accu => &self.accu,
            WeatherSource::CaiYun => &self.caiyun,
            WeatherSource::Cn => &self.cn,
        }
    }

    /// Configured endpoint, or the production one.
    pub fn base_url(&self, source: WeatherSource) -> String {
        self.source(source)
            .base_url
            .clone()
            .unwrap_or_else(|| source.default_base_url().to_string())
    }

    /// Daily window for a source, clamped to what it serves.
    pub fn daily_days_for(&self, source: WeatherSource) -> u8 {
        self.daily_days.min(source.max_daily_days()).max(1)
    }

    /// Hourly window for a source, clamped to what it serves.
    pub fn hourly_hours_for(&self, source: WeatherSource) -> u16 {
        self.hourly_hours.min(source.max_hourly_hours()).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Run the background refresh loop
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Regular refresh interval in minutes
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,

    /// Shortened interval used after a run with transient failures
    #[serde(default = "default_retry_interval")]
    pub retry_interval_minutes: u32,

    /// Locations refreshed in parallel after the primary one
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Require background location permission for scheduled runs
    #[serde(default = "default_true")]
    pub background_location: bool,
}

fn default_interval() -> u32 {
    90
}

fn default_retry_interval() -> u32 {
    15
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_interval(),
            retry_interval_minutes: default_retry_interval(),
            max_concurrent: default_max_concurrent(),
            background_location: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; defaults to `<config_dir>/nimbus.db`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nimbus");

        Self {
            config_dir,
            location: LocationConfig::default(),
            weather: WeatherConfig::default(),
            polling: PollingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, creating default if it doesn't exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let mut config = Self::default();
            if let Some(parent) = config_path.parent() {
                config.config_dir = parent.to_path_buf();
            }
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        if !validation.warnings.is_empty() {
            for warning in &validation.warnings {
                tracing::warn!("Config warning: {}", warning);
            }
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_location(&mut result);
        self.validate_weather(&mut result);

        // Polling
        if self.polling.enabled {
            if self.polling.interval_minutes == 0 {
                result.add_error(
                    "polling.interval_minutes",
                    "Polling interval must be greater than 0 when polling is enabled",
                );
            } else if self.polling.interval_minutes > 1440 {
                result.add_warning(
                    "polling.interval_minutes",
                    "Polling interval is more than 24 hours",
                );
            }
            if self.polling.retry_interval_minutes == 0 {
                result.add_error(
                    "polling.retry_interval_minutes",
                    "Retry interval must be greater than 0",
                );
            } else if self.polling.retry_interval_minutes > self.polling.interval_minutes {
                result.add_warning(
                    "polling.retry_interval_minutes",
                    "Retry interval is longer than the regular interval",
                );
            }
        }
        if self.polling.max_concurrent == 0 {
            result.add_error(
                "polling.max_concurrent",
                "At least one location must be refreshed at a time",
            );
        }

        result
    }

    fn validate_location(&self, result: &mut ValidationResult) {
        let location = &self.location;

        if location.provider_timeout_secs == 0 {
            result.add_error("location.provider_timeout_secs", "Timeout must be greater than 0");
        }
        if location.acquisition_timeout_secs == 0 {
            result.add_error(
                "location.acquisition_timeout_secs",
                "Timeout must be greater than 0",
            );
        } else if location.provider_timeout_secs > location.acquisition_timeout_secs {
            result.add_warning(
                "location.provider_timeout_secs",
                "Provider timeout exceeds the acquisition timeout; last-known fallback will never run",
            );
        }

        match location.provider {
            LocationProviderKind::Baidu | LocationProviderKind::BaiduIp => {
                if location.baidu_ak.as_deref().map_or(true, str::is_empty) {
                    result.add_error("location.baidu_ak", "Baidu providers need an application key");
                }
                self.validate_url(&location.baidu_base_url, "location.baidu_base_url", result);
            }
            LocationProviderKind::AMap => {
                if location.amap_key.as_deref().map_or(true, str::is_empty) {
                    result.add_error("location.amap_key", "AMap provider needs a web service key");
                }
                self.validate_url(&location.amap_base_url, "location.amap_base_url", result);
            }
            LocationProviderKind::Native => {}
        }
    }

    fn validate_weather(&self, result: &mut ValidationResult) {
        let weather = &self.weather;

        if !weather.default_source.is_supported() {
            result.add_error(
                "weather.default_source",
                format!("{} cannot fetch weather; choose another source", weather.default_source.display_name()),
            );
        }

        if weather.daily_days == 0 {
            result.add_error("weather.daily_days", "Daily window must be at least 1 day");
        } else if weather.daily_days > weather.default_source.max_daily_days() {
            result.add_warning(
                "weather.daily_days",
                format!(
                    "{} serves at most {} days; the window will be clamped",
                    weather.default_source.display_name(),
                    weather.default_source.max_daily_days()
                ),
            );
        }

        if weather.hourly_hours == 0 {
            result.add_error("weather.hourly_hours", "Hourly window must be at least 1 hour");
        }

        if weather.request_timeout_secs == 0 {
            result.add_error("weather.request_timeout_secs", "Timeout must be greater than 0");
        }

        if weather.user_agent.trim().is_empty() {
            result.add_error("weather.user_agent", "A User-Agent is required by MET Norway");
        }

        self.validate_url(&weather.geocoding_url, "weather.geocoding_url", result);
        self.validate_url(&weather.air_quality_url, "weather.air_quality_url", result);
        self.validate_url(&weather.nominatim_url, "weather.nominatim_url", result);

        for source in WeatherSource::ALL {
            let settings = weather.source(source);
            if let Some(url) = &settings.base_url {
                self.validate_url(url, &format!("weather.{}.base_url", source.id()), result);
            }

            if source.requires_api_key() && settings.key().is_none() {
                let field = format!("weather.{}.api_key", source.id());
                if source == weather.default_source {
                    result.add_error(
                        field,
                        format!("{} is the default source but has no API key", source.display_name()),
                    );
                } else {
                    result.add_warning(
                        field,
                        format!("{} not configured - locations using it will fail", source.display_name()),
                    );
                }
            }
        }
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                // Check scheme
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                // Check host
                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(
                    field_name,
                    format!("Invalid URL: {}", e),
                );
            }
        }
    }

    /// Path of the saved-locations database
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.config_dir.join("nimbus.db"))
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("nimbus");

        Ok(config_dir.join("config.toml"))
    }
}
