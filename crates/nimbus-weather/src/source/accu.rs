//! AccuWeather. Weather is keyed by AccuWeather's own location key, which
//! geoposition search attaches to a location before the first request.

use async_trait::async_trait;
use chrono::Utc;
use nimbus_core::{WeatherConfig, WeatherSource};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use super::{from_epoch, require_coordinate, ForecastWindow, WeatherSourceClient};
use crate::error::SourceError;
use crate::http::{handle_response, HttpClient};
use crate::types::*;

const HOURLY_STEPS: [u16; 5] = [1, 12, 24, 72, 120];
const DAILY_STEPS: [u8; 4] = [1, 5, 10, 15];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccuLocation {
    key: String,
    localized_name: String,
    country: Option<Named>,
    administrative_area: Option<Named>,
    time_zone: Option<AccuTimeZone>,
    geo_position: Option<GeoPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Named {
    #[serde(rename = "ID", default)]
    id: String,
    localized_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccuTimeZone {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GeoPosition {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Value {
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Metric {
    metric: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Direction {
    degrees: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CurrentWind {
    direction: Option<Direction>,
    speed: Option<Metric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CurrentGust {
    speed: Option<Metric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CurrentConditions {
    epoch_time: i64,
    weather_text: Option<String>,
    weather_icon: Option<i32>,
    temperature: Metric,
    real_feel_temperature: Option<Metric>,
    relative_humidity: Option<f64>,
    dew_point: Option<Metric>,
    wind: Option<CurrentWind>,
    wind_gust: Option<CurrentGust>,
    #[serde(rename = "UVIndex")]
    uv_index: Option<f64>,
    visibility: Option<Metric>,
    cloud_cover: Option<f64>,
    pressure: Option<Metric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ForecastWind {
    speed: Option<Value>,
    direction: Option<Direction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HalfDay {
    icon: Option<i32>,
    precipitation_probability: Option<f64>,
    total_liquid: Option<Value>,
    wind: Option<ForecastWind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Sun {
    epoch_rise: Option<i64>,
    epoch_set: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemperatureRange {
    minimum: Value,
    maximum: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Pollen {
    name: String,
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DailyEntry {
    date: String,
    sun: Option<Sun>,
    temperature: TemperatureRange,
    day: HalfDay,
    night: Option<HalfDay>,
    #[serde(default)]
    air_and_pollen: Vec<Pollen>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DailyResponse {
    #[serde(default)]
    daily_forecasts: Vec<DailyEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HourlyEntry {
    epoch_date_time: i64,
    weather_icon: Option<i32>,
    temperature: Value,
    precipitation_probability: Option<f64>,
    total_liquid: Option<Value>,
    wind: Option<ForecastWind>,
    relative_humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Localized {
    localized: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AlertArea {
    text: Option<String>,
    epoch_start_time: Option<i64>,
    epoch_end_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccuAlert {
    #[serde(rename = "AlertID")]
    alert_id: i64,
    description: Localized,
    level: Option<String>,
    #[serde(default)]
    area: Vec<AlertArea>,
}

/// AccuWeather icon number (1-44) to condition.
pub(crate) fn condition_from_icon(icon: i32) -> WeatherCondition {
    match icon {
        1 | 2 | 30 | 31 | 33 | 34 => WeatherCondition::Clear,
        3 | 4 | 35 | 36 => WeatherCondition::PartlyCloudy,
        6 | 7 | 8 | 38 => WeatherCondition::Cloudy,
        5 | 37 => WeatherCondition::Haze,
        11 => WeatherCondition::Fog,
        32 => WeatherCondition::Wind,
        12 | 13 | 14 | 39 | 40 => WeatherCondition::Rain,
        18 => WeatherCondition::HeavyRain,
        15 | 16 | 17 | 41 | 42 => WeatherCondition::Thunderstorm,
        19..=23 | 43 | 44 => WeatherCondition::Snow,
        24 | 25 | 26 | 29 => WeatherCondition::Sleet,
        _ => WeatherCondition::Clear,
    }
}

fn severity_from_level(level: Option<&str>) -> AlertSeverity {
    match level.map(str::to_ascii_lowercase).as_deref() {
        Some("red") | Some("extreme") => AlertSeverity::Extreme,
        Some("orange") | Some("severe") => AlertSeverity::Severe,
        Some("yellow") | Some("moderate") => AlertSeverity::Moderate,
        _ => AlertSeverity::Minor,
    }
}

/// Smallest endpoint step covering `wanted`, or the largest one.
fn step_for<T: Copy + PartialOrd>(steps: &[T], wanted: T) -> Option<T> {
    steps
        .iter()
        .copied()
        .find(|s| *s >= wanted)
        .or_else(|| steps.last().copied())
}

impl AccuLocation {
    fn geocode(&self) -> GeocodeInfo {
        GeocodeInfo {
            in_china: self.country.as_ref().is_some_and(|c| c.id == "CN"),
            country: self.country.as_ref().map(|c| c.localized_name.clone()),
            province: self.administrative_area.as_ref().map(|a| a.localized_name.clone()),
            city: Some(self.localized_name.clone()),
            district: None,
        }
    }
}

fn convert_current(current: CurrentConditions) -> Result<CurrentWeather, SourceError> {
    let temperature = current
        .temperature
        .metric
        .value
        .ok_or_else(|| SourceError::Parse("current conditions without temperature".to_string()))?;
    let metric = |m: Option<Metric>| m.and_then(|m| m.metric.value);
    let (speed, direction) = match current.wind {
        Some(w) => (metric(w.speed), w.direction.and_then(|d| d.degrees)),
        None => (None, None),
    };

    Ok(CurrentWeather {
        condition: current.weather_icon.map(condition_from_icon).unwrap_or_default(),
        text: current.weather_text,
        temperature,
        feels_like: metric(current.real_feel_temperature),
        humidity: current.relative_humidity,
        wind: Wind {
            speed,
            direction,
            gusts: current.wind_gust.and_then(|g| metric(g.speed)),
        },
        pressure: metric(current.pressure),
        visibility: metric(current.visibility),
        dew_point: metric(current.dew_point),
        cloud_cover: current.cloud_cover,
        uv_index: current.uv_index,
        air_quality: None,
    })
}

fn forecast_wind(wind: Option<ForecastWind>) -> Wind {
    match wind {
        Some(w) => Wind {
            speed: w.speed.and_then(|s| s.value),
            direction: w.direction.and_then(|d| d.degrees),
            gusts: None,
        },
        None => Wind::default(),
    }
}

fn convert_daily(entries: Vec<DailyEntry>, days: usize) -> Vec<DailyForecast> {
    entries
        .into_iter()
        .take(days)
        .filter_map(|entry| {
            let date = super::parse_time(&entry.date)?.date_naive();
            let condition_day = entry.day.icon.map(condition_from_icon).unwrap_or_default();
            let condition_night = entry
                .night
                .as_ref()
                .and_then(|n| n.icon)
                .map(condition_from_icon)
                .unwrap_or(condition_day);
            let uv_index = entry
                .air_and_pollen
                .iter()
                .find(|p| p.name == "UVIndex")
                .and_then(|p| p.value);
            let precipitation = [Some(&entry.day), entry.night.as_ref()]
                .into_iter()
                .flatten()
                .filter_map(|half| half.total_liquid.as_ref().and_then(|v| v.value))
                .reduce(|a, b| a + b);
            let precipitation_probability = [Some(&entry.day), entry.night.as_ref()]
                .into_iter()
                .flatten()
                .filter_map(|half| half.precipitation_probability)
                .reduce(f64::max);

            Some(DailyForecast {
                date,
                condition_day,
                condition_night,
                temperature_max: entry.temperature.maximum.value?,
                temperature_min: entry.temperature.minimum.value?,
                precipitation,
                precipitation_probability,
                wind: forecast_wind(entry.day.wind),
                sunrise: entry.sun.as_ref().and_then(|s| s.epoch_rise).and_then(from_epoch),
                sunset: entry.sun.as_ref().and_then(|s| s.epoch_set).and_then(from_epoch),
                uv_index,
            })
        })
        .collect()
}

fn convert_hourly(entries: Vec<HourlyEntry>, hours: usize) -> Vec<HourlyForecast> {
    entries
        .into_iter()
        .take(hours)
        .filter_map(|entry| {
            Some(HourlyForecast {
                time: from_epoch(entry.epoch_date_time)?,
                condition: entry.weather_icon.map(condition_from_icon).unwrap_or_default(),
                temperature: entry.temperature.value?,
                precipitation: entry.total_liquid.and_then(|v| v.value),
                precipitation_probability: entry.precipitation_probability,
                wind: forecast_wind(entry.wind),
                humidity: entry.relative_humidity,
            })
        })
        .collect()
}

fn convert_alerts(alerts: Vec<AccuAlert>) -> Vec<Alert> {
    alerts
        .into_iter()
        .map(|alert| {
            let area = alert.area.into_iter().next();
            Alert {
                id: alert.alert_id.to_string(),
                title: alert.description.localized,
                description: area.as_ref().and_then(|a| a.text.clone()).unwrap_or_default(),
                severity: severity_from_level(alert.level.as_deref()),
                start: area.as_ref().and_then(|a| a.epoch_start_time).and_then(from_epoch),
                end: area.as_ref().and_then(|a| a.epoch_end_time).and_then(from_epoch),
            }
        })
        .collect()
}

pub struct AccuClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
    language: String,
    window: ForecastWindow,
}

impl AccuClient {
    pub fn new(http: HttpClient, config: &WeatherConfig, api_key: &str) -> Self {
        Self {
            http,
            base_url: config.base_url(WeatherSource::Accu).trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            language: config.language.clone(),
            window: ForecastWindow::for_source(config, WeatherSource::Accu),
        }
    }

    /// GET with the key attached. A 503 whose body mentions the quota is the
    /// daily limit, not an outage.
    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut query = vec![
            ("apikey", self.api_key.clone()),
            ("language", self.language.clone()),
        ];
        query.extend(extra.iter().cloned());

        let response = self.http.get(&url, &query).await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            let text = response.text().await?;
            return Err(if text.to_ascii_lowercase().contains("exceeded") {
                SourceError::ApiLimit(text)
            } else {
                SourceError::Status {
                    status: 503,
                    message: text,
                }
            });
        }
        handle_response(response).await
    }

    fn location_key<'a>(&self, location: &'a Location) -> Result<&'a str, SourceError> {
        if location.city_id.is_empty() {
            return Err(SourceError::EmptyResult("AccuWeather location key".to_string()));
        }
        Ok(&location.city_id)
    }
}

#[async_trait]
impl WeatherSourceClient for AccuClient {
    fn source(&self) -> WeatherSource {
        WeatherSource::Accu
    }

    #[instrument(skip(self), level = "info")]
    async fn search(&self, query: &str) -> Result<Vec<Location>, SourceError> {
        let results: Vec<AccuLocation> = self
            .fetch("locations/v1/cities/search", &[("q", query.to_string())])
            .await?;

        Ok(results
            .into_iter()
            .filter_map(|r| {
                let position = r.geo_position.as_ref()?;
                let coordinate = Coordinate::new(position.latitude, position.longitude);
                let timezone = r
                    .time_zone
                    .as_ref()
                    .map(|tz| tz.name.clone())
                    .unwrap_or_else(|| "auto".to_string());
                Some(Location::resident(
                    r.key.clone(),
                    coordinate,
                    timezone,
                    r.geocode(),
                    WeatherSource::Accu,
                ))
            })
            .collect())
    }

    #[instrument(skip_all, fields(id = %location.formatted_id), level = "info")]
    async fn reverse_geocode(&self, location: &Location) -> Result<Location, SourceError> {
        let coordinate = require_coordinate(location)?;
        let found: Option<AccuLocation> = self
            .fetch(
                "locations/v1/cities/geoposition/search",
                &[(
                    "q",
                    format!("{},{}", coordinate.latitude, coordinate.longitude),
                )],
            )
            .await?;
        let found = found.ok_or_else(|| {
            SourceError::EmptyResult(format!("AccuWeather geoposition {}", coordinate))
        })?;

        let mut resolved = location.clone();
        resolved.city_id = found.key.clone();
        resolved.geocode = found.geocode();
        if let Some(tz) = found.time_zone {
            resolved.timezone = tz.name;
        }
        Ok(resolved)
    }

    #[instrument(skip_all, fields(id = %location.formatted_id), level = "info")]
    async fn request_weather(&self, location: &Location) -> Result<Weather, SourceError> {
        let key = self.location_key(location)?;
        let days = step_for(&DAILY_STEPS, self.window.daily_days).unwrap_or(15);
        let hours = step_for(&HOURLY_STEPS, self.window.hourly_hours).unwrap_or(120);

        let current_path = format!("currentconditions/v1/{}", key);
        let daily_path = format!("forecasts/v1/daily/{}day/{}", days, key);
        let hourly_path = format!("forecasts/v1/hourly/{}hour/{}", hours, key);
        let alerts_path = format!("alerts/v1/{}", key);
        let detailed = [("details", "true".to_string())];
        let metric = [
            ("details", "true".to_string()),
            ("metric", "true".to_string()),
        ];

        let (main, alerts) = tokio::join!(
            async {
                tokio::try_join!(
                    self.fetch::<Vec<CurrentConditions>>(&current_path, &detailed),
                    self.fetch::<DailyResponse>(&daily_path, &metric),
                    self.fetch::<Vec<HourlyEntry>>(&hourly_path, &metric),
                )
            },
            self.fetch::<Vec<AccuAlert>>(&alerts_path, &detailed),
        );
        let (current, daily, hourly) = main?;

        let current = current
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::EmptyResult("AccuWeather current conditions".to_string()))?;
        let publish_time = from_epoch(current.epoch_time).unwrap_or_else(Utc::now);

        // Alerts are not available everywhere
        let alerts = match alerts {
            Ok(alerts) => convert_alerts(alerts),
            Err(e) => {
                tracing::debug!("AccuWeather alerts unavailable: {}", e);
                Vec::new()
            }
        };

        Ok(Weather {
            base: WeatherBase {
                city_id: key.to_string(),
                publish_time,
                update_time: Utc::now(),
            },
            current: convert_current(current)?,
            hourly: convert_hourly(hourly, self.window.hourly_hours as usize),
            daily: convert_daily(daily.daily_forecasts, self.window.daily_days as usize),
            alerts,
        })
    }
}
