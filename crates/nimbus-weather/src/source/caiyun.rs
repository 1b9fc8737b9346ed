//! CaiYun (ColorfulClouds) v2.5. One request returns realtime, hourly, daily
//! and alerts. Place search goes through the shared geocoding search.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use nimbus_core::{WeatherConfig, WeatherSource};
use serde::Deserialize;
use tracing::instrument;

use super::{
    from_epoch, parse_time, require_coordinate, reverse_geocode_or_passthrough, ForecastWindow,
    GeocodingSearch, WeatherSourceClient,
};
use crate::error::SourceError;
use crate::geocode::NominatimClient;
use crate::http::HttpClient;
use crate::types::*;

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    error: Option<String>,
    server_time: Option<i64>,
    result: Option<CaiYunResult>,
}

#[derive(Debug, Deserialize)]
struct CaiYunResult {
    realtime: Realtime,
    hourly: Option<Hourly>,
    daily: Option<Daily>,
    alert: Option<AlertBlock>,
}

#[derive(Debug, Deserialize)]
struct CaiYunWind {
    speed: Option<f64>,
    direction: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CaiYunAirQuality {
    pm25: Option<f64>,
    pm10: Option<f64>,
    o3: Option<f64>,
    so2: Option<f64>,
    no2: Option<f64>,
    co: Option<f64>,
    aqi: Option<Aqi>,
}

#[derive(Debug, Deserialize)]
struct Aqi {
    chn: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Ultraviolet {
    index: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RealtimeLifeIndex {
    ultraviolet: Option<Ultraviolet>,
}

#[derive(Debug, Deserialize)]
struct Realtime {
    temperature: f64,
    apparent_temperature: Option<f64>,
    /// 0..1
    humidity: Option<f64>,
    /// 0..1
    cloudrate: Option<f64>,
    skycon: String,
    visibility: Option<f64>,
    wind: Option<CaiYunWind>,
    /// Pa
    pressure: Option<f64>,
    air_quality: Option<CaiYunAirQuality>,
    life_index: Option<RealtimeLifeIndex>,
}

#[derive(Debug, Deserialize)]
struct TimedValue<T> {
    datetime: String,
    value: T,
}

#[derive(Debug, Deserialize)]
struct TimedPrecipitation {
    value: Option<f64>,
    probability: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TimedWind {
    speed: Option<f64>,
    direction: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct Hourly {
    #[serde(default)]
    temperature: Vec<TimedValue<f64>>,
    #[serde(default)]
    skycon: Vec<TimedValue<String>>,
    #[serde(default)]
    humidity: Vec<TimedValue<f64>>,
    #[serde(default)]
    precipitation: Vec<TimedPrecipitation>,
    #[serde(default)]
    wind: Vec<TimedWind>,
}

#[derive(Debug, Deserialize)]
struct SunTime {
    time: String,
}

#[derive(Debug, Deserialize)]
struct Astro {
    date: String,
    sunrise: Option<SunTime>,
    sunset: Option<SunTime>,
}

#[derive(Debug, Deserialize)]
struct DailyTemperature {
    date: String,
    max: f64,
    min: f64,
}

#[derive(Debug, Deserialize)]
struct DailySkycon {
    value: String,
}

#[derive(Debug, Deserialize)]
struct DailyPrecipitation {
    /// mm/h
    avg: Option<f64>,
    probability: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DailyWind {
    avg: Option<CaiYunWind>,
}

#[derive(Debug, Deserialize)]
struct DailyUltraviolet {
    index: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DailyLifeIndex {
    #[serde(default)]
    ultraviolet: Vec<DailyUltraviolet>,
}

#[derive(Debug, Default, Deserialize)]
struct Daily {
    #[serde(default)]
    astro: Vec<Astro>,
    #[serde(default)]
    temperature: Vec<DailyTemperature>,
    #[serde(default)]
    skycon_08h_20h: Vec<DailySkycon>,
    #[serde(default)]
    skycon_20h_32h: Vec<DailySkycon>,
    #[serde(default)]
    precipitation: Vec<DailyPrecipitation>,
    #[serde(default)]
    wind: Vec<DailyWind>,
    #[serde(default)]
    life_index: DailyLifeIndex,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertBlock {
    #[serde(default)]
    content: Vec<AlertContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertContent {
    alert_id: String,
    title: String,
    #[serde(default)]
    description: String,
    /// Four digits: event type, then level
    #[serde(default)]
    code: String,
    pubtimestamp: Option<i64>,
}

pub(crate) fn condition_from_skycon(skycon: &str) -> WeatherCondition {
    match skycon {
        "CLEAR_DAY" | "CLEAR_NIGHT" => WeatherCondition::Clear,
        "PARTLY_CLOUDY_DAY" | "PARTLY_CLOUDY_NIGHT" => WeatherCondition::PartlyCloudy,
        "CLOUDY" => WeatherCondition::Cloudy,
        "LIGHT_HAZE" | "MODERATE_HAZE" | "HEAVY_HAZE" | "DUST" | "SAND" => WeatherCondition::Haze,
        "FOG" => WeatherCondition::Fog,
        "WIND" => WeatherCondition::Wind,
        "LIGHT_RAIN" => WeatherCondition::Drizzle,
        "MODERATE_RAIN" => WeatherCondition::Rain,
        "HEAVY_RAIN" | "STORM_RAIN" => WeatherCondition::HeavyRain,
        "LIGHT_SNOW" | "MODERATE_SNOW" | "HEAVY_SNOW" | "STORM_SNOW" => WeatherCondition::Snow,
        "SLEET" => WeatherCondition::Sleet,
        "HAIL" => WeatherCondition::Hail,
        "THUNDER_SHOWER" => WeatherCondition::Thunderstorm,
        _ => WeatherCondition::Clear,
    }
}

/// Alert level from the last two digits of the code (blue to red).
fn severity_from_code(code: &str) -> AlertSeverity {
    match code.get(code.len().saturating_sub(2)..) {
        Some("04") => AlertSeverity::Extreme,
        Some("03") => AlertSeverity::Severe,
        Some("02") => AlertSeverity::Moderate,
        _ => AlertSeverity::Minor,
    }
}

fn percent(fraction: Option<f64>) -> Option<f64> {
    fraction.map(|f| f * 100.0)
}

/// "05:12" on the day of `date` ("2024-05-01T00:00+08:00").
fn sun_time(date: &str, time: Option<&SunTime>) -> Option<DateTime<Utc>> {
    let day = parse_time(date)?;
    let clock = NaiveTime::parse_from_str(&time?.time, "%H:%M").ok()?;
    let local = day.date_naive().and_time(clock);
    local
        .and_local_timezone(*day.offset())
        .single()
        .map(|t| t.with_timezone(&Utc))
}

fn convert_current(realtime: Realtime) -> CurrentWeather {
    let air_quality = realtime.air_quality.map(|aq| AirQuality {
        aqi: aq.aqi.and_then(|a| a.chn),
        pm25: aq.pm25,
        pm10: aq.pm10,
        so2: aq.so2,
        no2: aq.no2,
        o3: aq.o3,
        co: aq.co,
    });

    CurrentWeather {
        condition: condition_from_skycon(&realtime.skycon),
        text: None,
        temperature: realtime.temperature,
        feels_like: realtime.apparent_temperature,
        humidity: percent(realtime.humidity),
        wind: Wind {
            speed: realtime.wind.as_ref().and_then(|w| w.speed),
            direction: realtime.wind.as_ref().and_then(|w| w.direction),
            gusts: None,
        },
        pressure: realtime.pressure.map(|pa| pa / 100.0),
        visibility: realtime.visibility,
        dew_point: None,
        cloud_cover: percent(realtime.cloudrate),
        uv_index: realtime
            .life_index
            .and_then(|l| l.ultraviolet)
            .and_then(|u| u.index),
        air_quality: air_quality.filter(|aq| !aq.is_empty()),
    }
}

fn convert_hourly(hourly: Hourly, hours: usize) -> Vec<HourlyForecast> {
    hourly
        .temperature
        .iter()
        .enumerate()
        .take(hours)
        .filter_map(|(i, temperature)| {
            let time = parse_time(&temperature.datetime)?.with_timezone(&Utc);
            let precipitation = hourly.precipitation.get(i);
            let wind = hourly.wind.get(i);
            Some(HourlyForecast {
                time,
                condition: hourly
                    .skycon
                    .get(i)
                    .map(|s| condition_from_skycon(&s.value))
                    .unwrap_or_default(),
                temperature: temperature.value,
                precipitation: precipitation.and_then(|p| p.value),
                precipitation_probability: precipitation.and_then(|p| p.probability),
                wind: Wind {
                    speed: wind.and_then(|w| w.speed),
                    direction: wind.and_then(|w| w.direction),
                    gusts: None,
                },
                humidity: percent(hourly.humidity.get(i).map(|h| h.value)),
            })
        })
        .collect()
}

fn convert_daily(daily: Daily, days: usize) -> Vec<DailyForecast> {
    daily
        .temperature
        .iter()
        .enumerate()
        .take(days)
        .filter_map(|(i, temperature)| {
            let date = parse_time(&temperature.date)?.date_naive();
            let condition_day = daily
                .skycon_08h_20h
                .get(i)
                .map(|s| condition_from_skycon(&s.value))
                .unwrap_or_default();
            let condition_night = daily
                .skycon_20h_32h
                .get(i)
                .map(|s| condition_from_skycon(&s.value))
                .unwrap_or(condition_day);
            let precipitation = daily.precipitation.get(i);
            let wind = daily.wind.get(i).and_then(|w| w.avg.as_ref());
            let astro = daily.astro.get(i);

            Some(DailyForecast {
                date,
                condition_day,
                condition_night,
                temperature_max: temperature.max,
                temperature_min: temperature.min,
                // Daily average intensity to a daily total
                precipitation: precipitation.and_then(|p| p.avg).map(|mm_h| mm_h * 24.0),
                precipitation_probability: precipitation.and_then(|p| p.probability),
                wind: Wind {
                    speed: wind.and_then(|w| w.speed),
                    direction: wind.and_then(|w| w.direction),
                    gusts: None,
                },
                sunrise: astro.and_then(|a| sun_time(&a.date, a.sunrise.as_ref())),
                sunset: astro.and_then(|a| sun_time(&a.date, a.sunset.as_ref())),
                uv_index: daily
                    .life_index
                    .ultraviolet
                    .get(i)
                    .and_then(|u| u.index.as_deref())
                    .and_then(|s| s.parse().ok()),
            })
        })
        .collect()
}

fn convert_alerts(block: Option<AlertBlock>) -> Vec<Alert> {
    block
        .map(|b| b.content)
        .unwrap_or_default()
        .into_iter()
        .map(|a| Alert {
            severity: severity_from_code(&a.code),
            id: a.alert_id,
            title: a.title,
            description: a.description,
            start: a.pubtimestamp.and_then(from_epoch),
            end: None,
        })
        .collect()
}

pub struct CaiYunClient {
    http: HttpClient,
    base_url: String,
    token: String,
    language: String,
    window: ForecastWindow,
    geocoding: GeocodingSearch,
    nominatim: NominatimClient,
}

impl CaiYunClient {
    pub fn new(
        http: HttpClient,
        config: &WeatherConfig,
        token: &str,
        geocoding: GeocodingSearch,
        nominatim: NominatimClient,
    ) -> Self {
        Self {
            http,
            base_url: config.base_url(WeatherSource::CaiYun).trim_end_matches('/').to_string(),
            token: token.to_string(),
            language: config.language.clone(),
            window: ForecastWindow::for_source(config, WeatherSource::CaiYun),
            geocoding,
            nominatim,
        }
    }

    fn lang(&self) -> &'static str {
        if self.language.starts_with("zh") {
            "zh_CN"
        } else {
            "en_US"
        }
    }
}

#[async_trait]
impl WeatherSourceClient for CaiYunClient {
    fn source(&self) -> WeatherSource {
        WeatherSource::CaiYun
    }

    async fn search(&self, query: &str) -> Result<Vec<Location>, SourceError> {
        self.geocoding
            .search(query, &self.language, WeatherSource::CaiYun)
            .await
    }

    async fn reverse_geocode(&self, location: &Location) -> Result<Location, SourceError> {
        reverse_geocode_or_passthrough(&self.nominatim, location).await
    }

    #[instrument(skip_all, fields(id = %location.formatted_id), level = "info")]
    async fn request_weather(&self, location: &Location) -> Result<Weather, SourceError> {
        let coordinate = require_coordinate(location)?;
        let url = format!(
            "{}/v2.5/{}/{:.4},{:.4}/weather.json",
            self.base_url, self.token, coordinate.longitude, coordinate.latitude
        );
        let envelope: Envelope = self
            .http
            .get_json(
                &url,
                &[
                    ("alert", "true".to_string()),
                    ("dailysteps", self.window.daily_days.to_string()),
                    ("hourlysteps", self.window.hourly_hours.to_string()),
                    ("unit", "metric:v2".to_string()),
                    ("lang", self.lang().to_string()),
                ],
            )
            .await?;

        if envelope.status != "ok" {
            let message = envelope.error.unwrap_or(envelope.status);
            let lowered = message.to_ascii_lowercase();
            return Err(
                if ["token", "quota", "limit"].iter().any(|w| lowered.contains(w)) {
                    SourceError::ApiLimit(message)
                } else {
                    SourceError::Status {
                        status: 200,
                        message,
                    }
                },
            );
        }

        let result = envelope
            .result
            .ok_or_else(|| SourceError::EmptyResult("CaiYun result".to_string()))?;
        let now = Utc::now();

        Ok(Weather {
            base: WeatherBase {
                city_id: location.city_id.clone(),
                publish_time: envelope.server_time.and_then(from_epoch).unwrap_or(now),
                update_time: now,
            },
            current: convert_current(result.realtime),
            hourly: convert_hourly(result.hourly.unwrap_or_default(), self.window.hourly_hours as usize),
            daily: convert_daily(result.daily.unwrap_or_default(), self.window.daily_days as usize),
            alerts: convert_alerts(result.alert),
        })
    }
}
