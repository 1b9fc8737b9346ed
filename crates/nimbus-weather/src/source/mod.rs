//! Weather source clients.
//!
//! Every provider implements [`WeatherSourceClient`]: geocoding search,
//! reverse geocoding (or coordinate passthrough) and forecast retrieval, all
//! converted into the shared model in canonical units.

mod accu;
mod caiyun;
mod metno;
mod open_meteo;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use nimbus_core::{WeatherConfig, WeatherSource};

use crate::error::SourceError;
use crate::geocode::NominatimClient;
use crate::http::HttpClient;
use crate::types::{Coordinate, Location, Weather};

pub use accu::AccuClient;
pub use caiyun::CaiYunClient;
pub use metno::MetNoClient;
pub use open_meteo::{GeocodingSearch, OpenMeteoClient};

#[async_trait]
pub trait WeatherSourceClient: Send + Sync {
    fn source(&self) -> WeatherSource;

    /// Geocoding search. Results are resident locations bound to this source.
    async fn search(&self, query: &str) -> Result<Vec<Location>, SourceError>;

    /// Attach provider key and names to a location with a coordinate.
    async fn reverse_geocode(&self, location: &Location) -> Result<Location, SourceError>;

    async fn request_weather(&self, location: &Location) -> Result<Weather, SourceError>;
}

/// Forecast lengths requested from one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastWindow {
    pub daily_days: u8,
    pub hourly_hours: u16,
}

impl ForecastWindow {
    pub fn for_source(config: &WeatherConfig, source: WeatherSource) -> Self {
        Self {
            daily_days: config.daily_days_for(source),
            hourly_hours: config.hourly_hours_for(source),
        }
    }
}

/// Maps each source to its client.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    clients: HashMap<WeatherSource, Arc<dyn WeatherSourceClient>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every source from configuration. Keyed sources without a key are
    /// skipped with a warning; locations bound to them fail at request time.
    pub fn from_config(config: &WeatherConfig, http: HttpClient) -> Self {
        let mut registry = Self::new();
        let nominatim = NominatimClient::new(http.clone(), &config.nominatim_url, &config.language);
        let geocoding = GeocodingSearch::new(http.clone(), &config.geocoding_url);

        registry.register(Arc::new(OpenMeteoClient::new(
            http.clone(),
            config,
            geocoding.clone(),
            nominatim.clone(),
        )));
        registry.register(Arc::new(MetNoClient::new(
            http.clone(),
            config,
            geocoding.clone(),
            nominatim.clone(),
        )));

        match config.accu.key() {
            Some(key) => registry.register(Arc::new(AccuClient::new(http.clone(), config, key))),
            None => tracing::warn!("AccuWeather not configured - skipping"),
        }
        match config.caiyun.key() {
            Some(token) => registry.register(Arc::new(CaiYunClient::new(
                http,
                config,
                token,
                geocoding,
                nominatim,
            ))),
            None => tracing::warn!("CaiYun not configured - skipping"),
        }

        registry
    }

    pub fn register(&mut self, client: Arc<dyn WeatherSourceClient>) {
        self.clients.insert(client.source(), client);
    }

    /// Client for `source`. Unregistered sources are either unconfigured
    /// (missing key) or have no client at all.
    pub fn get(&self, source: WeatherSource) -> Result<Arc<dyn WeatherSourceClient>, SourceError> {
        if let Some(client) = self.clients.get(&source) {
            return Ok(client.clone());
        }
        let name = source.display_name().to_string();
        Err(if source.is_supported() {
            SourceError::MissingCredential(name)
        } else {
            SourceError::Unsupported(name)
        })
    }

    pub fn sources(&self) -> Vec<WeatherSource> {
        WeatherSource::ALL
            .into_iter()
            .filter(|s| self.clients.contains_key(s))
            .collect()
    }
}

pub(crate) fn require_coordinate(location: &Location) -> Result<Coordinate, SourceError> {
    location
        .coordinate
        .filter(Coordinate::is_valid)
        .ok_or(SourceError::MissingCoordinate)
}

/// Reverse geocoding for sources without their own: Nominatim, falling back
/// to the bare coordinate when the lookup fails.
pub(crate) async fn reverse_geocode_or_passthrough(
    nominatim: &NominatimClient,
    location: &Location,
) -> Result<Location, SourceError> {
    let coordinate = require_coordinate(location)?;
    let mut resolved = location.clone();
    if !resolved.geocode.is_empty() {
        return Ok(resolved);
    }

    match nominatim.reverse(&coordinate).await {
        Ok(geocode) => resolved.geocode = geocode,
        Err(e) => tracing::debug!("Reverse geocode failed, keeping coordinate only: {}", e),
    }
    Ok(resolved)
}

/// Parse provider timestamps: RFC 3339, or RFC 3339 without seconds
/// ("2024-05-01T05:32+02:00").
pub(crate) fn parse_time(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M%:z"))
        .ok()
}

pub(crate) fn from_epoch(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}
