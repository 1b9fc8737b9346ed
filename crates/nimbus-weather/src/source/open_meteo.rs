//! Open-Meteo: forecast, air quality and geocoding search. No API key.

use async_trait::async_trait;
use chrono::Utc;
use nimbus_core::{WeatherConfig, WeatherSource};
use serde::Deserialize;
use tracing::instrument;

use super::{
    from_epoch, require_coordinate, reverse_geocode_or_passthrough, ForecastWindow,
    WeatherSourceClient,
};
use crate::error::SourceError;
use crate::geocode::NominatimClient;
use crate::http::HttpClient;
use crate::types::*;

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,precipitation,\
weather_code,cloud_cover,pressure_msl,wind_speed_10m,wind_direction_10m,wind_gusts_10m,visibility,\
uv_index,dew_point_2m";
const HOURLY_FIELDS: &str = "temperature_2m,relative_humidity_2m,precipitation_probability,precipitation,\
weather_code,wind_speed_10m,wind_direction_10m";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,sunrise,sunset,\
precipitation_sum,precipitation_probability_max,wind_speed_10m_max,wind_direction_10m_dominant,uv_index_max";
const AIR_QUALITY_FIELDS: &str =
    "european_aqi,pm10,pm2_5,carbon_monoxide,nitrogen_dioxide,sulphur_dioxide,ozone";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: i64,
    name: String,
    latitude: f64,
    longitude: f64,
    timezone: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
    admin1: Option<String>,
}

/// Open-Meteo geocoding search, shared by the sources without their own.
#[derive(Debug, Clone)]
pub struct GeocodingSearch {
    http: HttpClient,
    base_url: String,
}

impl GeocodingSearch {
    pub fn new(http: HttpClient, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[instrument(skip(self), level = "info")]
    pub async fn search(
        &self,
        query: &str,
        language: &str,
        source: WeatherSource,
    ) -> Result<Vec<Location>, SourceError> {
        let url = format!("{}/v1/search", self.base_url);
        let body: SearchResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("name", query.to_string()),
                    ("count", "20".to_string()),
                    ("language", language.to_string()),
                    ("format", "json".to_string()),
                ],
            )
            .await?;

        Ok(body
            .results
            .into_iter()
            .map(|r| {
                let in_china = r.country_code.as_deref() == Some("CN");
                Location::resident(
                    r.id.to_string(),
                    Coordinate::new(r.latitude, r.longitude),
                    r.timezone.unwrap_or_else(|| "auto".to_string()),
                    GeocodeInfo {
                        country: r.country,
                        province: r.admin1,
                        city: Some(r.name),
                        district: None,
                        in_china,
                    },
                    source,
                )
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    utc_offset_seconds: i64,
    current: Option<CurrentBlock>,
    hourly: Option<HourlyBlock>,
    daily: Option<DailyBlock>,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: i64,
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    apparent_temperature: Option<f64>,
    weather_code: Option<i32>,
    cloud_cover: Option<f64>,
    pressure_msl: Option<f64>,
    wind_speed_10m: Option<f64>,
    wind_direction_10m: Option<f64>,
    wind_gusts_10m: Option<f64>,
    /// meters
    visibility: Option<f64>,
    uv_index: Option<f64>,
    dew_point_2m: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    #[serde(default)]
    time: Vec<i64>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability: Vec<Option<f64>>,
    #[serde(default)]
    precipitation: Vec<Option<f64>>,
    #[serde(default)]
    weather_code: Vec<Option<i32>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_10m: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    #[serde(default)]
    time: Vec<i64>,
    #[serde(default)]
    weather_code: Vec<Option<i32>>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    sunrise: Vec<Option<i64>>,
    #[serde(default)]
    sunset: Vec<Option<i64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability_max: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_10m_dominant: Vec<Option<f64>>,
    #[serde(default)]
    uv_index_max: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AirQualityResponse {
    current: Option<AirQualityBlock>,
}

#[derive(Debug, Deserialize)]
struct AirQualityBlock {
    european_aqi: Option<f64>,
    pm10: Option<f64>,
    pm2_5: Option<f64>,
    /// µg/m³
    carbon_monoxide: Option<f64>,
    nitrogen_dioxide: Option<f64>,
    sulphur_dioxide: Option<f64>,
    ozone: Option<f64>,
}

fn at<T: Copy>(values: &[Option<T>], index: usize) -> Option<T> {
    values.get(index).copied().flatten()
}

pub struct OpenMeteoClient {
    http: HttpClient,
    base_url: String,
    air_quality_url: String,
    language: String,
    window: ForecastWindow,
    geocoding: GeocodingSearch,
    nominatim: NominatimClient,
}

impl OpenMeteoClient {
    pub fn new(
        http: HttpClient,
        config: &WeatherConfig,
        geocoding: GeocodingSearch,
        nominatim: NominatimClient,
    ) -> Self {
        Self {
            http,
            base_url: config.base_url(WeatherSource::OpenMeteo).trim_end_matches('/').to_string(),
            air_quality_url: config.air_quality_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            window: ForecastWindow::for_source(config, WeatherSource::OpenMeteo),
            geocoding,
            nominatim,
        }
    }

    async fn forecast(&self, location: &Location, coordinate: &Coordinate) -> Result<ForecastResponse, SourceError> {
        let url = format!("{}/v1/forecast", self.base_url);
        self.http
            .get_json(
                &url,
                &[
                    ("latitude", coordinate.latitude.to_string()),
                    ("longitude", coordinate.longitude.to_string()),
                    ("timezone", location.timezone.clone()),
                    ("timeformat", "unixtime".to_string()),
                    ("forecast_days", self.window.daily_days.to_string()),
                    ("forecast_hours", self.window.hourly_hours.to_string()),
                    ("current", CURRENT_FIELDS.to_string()),
                    ("hourly", HOURLY_FIELDS.to_string()),
                    ("daily", DAILY_FIELDS.to_string()),
                ],
            )
            .await
    }

    async fn air_quality(&self, coordinate: &Coordinate) -> Result<AirQualityResponse, SourceError> {
        let url = format!("{}/v1/air-quality", self.air_quality_url);
        self.http
            .get_json(
                &url,
                &[
                    ("latitude", coordinate.latitude.to_string()),
                    ("longitude", coordinate.longitude.to_string()),
                    ("current", AIR_QUALITY_FIELDS.to_string()),
                ],
            )
            .await
    }
}

fn convert_air_quality(block: AirQualityBlock) -> AirQuality {
    AirQuality {
        aqi: block.european_aqi,
        pm25: block.pm2_5,
        pm10: block.pm10,
        so2: block.sulphur_dioxide,
        no2: block.nitrogen_dioxide,
        o3: block.ozone,
        co: block.carbon_monoxide.map(|v| v / 1000.0),
    }
}

fn convert(
    forecast: ForecastResponse,
    air_quality: Option<AirQuality>,
    window: ForecastWindow,
    city_id: &str,
) -> Result<Weather, SourceError> {
    let current = forecast
        .current
        .ok_or_else(|| SourceError::Parse("forecast without current block".to_string()))?;
    let temperature = current
        .temperature_2m
        .ok_or_else(|| SourceError::Parse("current block without temperature".to_string()))?;

    let current_weather = CurrentWeather {
        condition: WeatherCondition::from_wmo_code(current.weather_code.unwrap_or(0)),
        text: None,
        temperature,
        feels_like: current.apparent_temperature,
        humidity: current.relative_humidity_2m,
        wind: Wind {
            speed: current.wind_speed_10m,
            direction: current.wind_direction_10m,
            gusts: current.wind_gusts_10m,
        },
        pressure: current.pressure_msl,
        visibility: current.visibility.map(|m| m / 1000.0),
        dew_point: current.dew_point_2m,
        cloud_cover: current.cloud_cover,
        uv_index: current.uv_index,
        air_quality,
    };

    let hourly = forecast
        .hourly
        .map(|h| {
            h.time
                .iter()
                .enumerate()
                .take(window.hourly_hours as usize)
                .filter_map(|(i, &time)| {
                    Some(HourlyForecast {
                        time: from_epoch(time)?,
                        condition: WeatherCondition::from_wmo_code(at(&h.weather_code, i).unwrap_or(0)),
                        temperature: at(&h.temperature_2m, i)?,
                        precipitation: at(&h.precipitation, i),
                        precipitation_probability: at(&h.precipitation_probability, i),
                        wind: Wind {
                            speed: at(&h.wind_speed_10m, i),
                            direction: at(&h.wind_direction_10m, i),
                            gusts: None,
                        },
                        humidity: at(&h.relative_humidity_2m, i),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let offset = forecast.utc_offset_seconds;
    let daily = forecast
        .daily
        .map(|d| {
            d.time
                .iter()
                .enumerate()
                .take(window.daily_days as usize)
                .filter_map(|(i, &time)| {
                    let condition = WeatherCondition::from_wmo_code(at(&d.weather_code, i).unwrap_or(0));
                    Some(DailyForecast {
                        // Daily timestamps are local midnight
                        date: from_epoch(time + offset)?.date_naive(),
                        condition_day: condition,
                        condition_night: condition,
                        temperature_max: at(&d.temperature_2m_max, i)?,
                        temperature_min: at(&d.temperature_2m_min, i)?,
                        precipitation: at(&d.precipitation_sum, i),
                        precipitation_probability: at(&d.precipitation_probability_max, i),
                        wind: Wind {
                            speed: at(&d.wind_speed_10m_max, i),
                            direction: at(&d.wind_direction_10m_dominant, i),
                            gusts: None,
                        },
                        sunrise: at(&d.sunrise, i).and_then(from_epoch),
                        sunset: at(&d.sunset, i).and_then(from_epoch),
                        uv_index: at(&d.uv_index_max, i),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let now = Utc::now();
    Ok(Weather {
        base: WeatherBase {
            city_id: city_id.to_string(),
            publish_time: from_epoch(current.time).unwrap_or(now),
            update_time: now,
        },
        current: current_weather,
        hourly,
        daily,
        alerts: Vec::new(),
    })
}

#[async_trait]
impl WeatherSourceClient for OpenMeteoClient {
    fn source(&self) -> WeatherSource {
        WeatherSource::OpenMeteo
    }

    async fn search(&self, query: &str) -> Result<Vec<Location>, SourceError> {
        self.geocoding
            .search(query, &self.language, WeatherSource::OpenMeteo)
            .await
    }

    async fn reverse_geocode(&self, location: &Location) -> Result<Location, SourceError> {
        reverse_geocode_or_passthrough(&self.nominatim, location).await
    }

    #[instrument(skip_all, fields(id = %location.formatted_id), level = "info")]
    async fn request_weather(&self, location: &Location) -> Result<Weather, SourceError> {
        let coordinate = require_coordinate(location)?;

        let (forecast, air_quality) =
            tokio::join!(self.forecast(location, &coordinate), self.air_quality(&coordinate));
        let forecast = forecast?;

        // Air quality is optional; the forecast alone is a usable result
        let air_quality = match air_quality {
            Ok(AirQualityResponse { current: Some(block) }) => Some(convert_air_quality(block)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Open-Meteo air quality failed: {}", e);
                None
            }
        };

        convert(forecast, air_quality, self.window, &location.city_id)
    }
}
