//! MET Norway (api.met.no): locationforecast 2.0 plus the sunrise service.
//!
//! The forecast is a flat timeseries (hourly for about two days, six-hourly
//! after), so daily entries are aggregated here in the location's local time.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use nimbus_core::{WeatherConfig, WeatherSource};
use serde::Deserialize;
use tracing::instrument;

use super::{
    parse_time, require_coordinate, reverse_geocode_or_passthrough, ForecastWindow,
    GeocodingSearch, WeatherSourceClient,
};
use crate::error::SourceError;
use crate::geocode::NominatimClient;
use crate::http::HttpClient;
use crate::types::*;

const MS_TO_KMH: f64 = 3.6;

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Properties {
    meta: Meta,
    #[serde(default)]
    timeseries: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Step {
    time: DateTime<Utc>,
    data: StepData,
}

#[derive(Debug, Deserialize)]
struct StepData {
    instant: Instant,
    next_1_hours: Option<Period>,
    next_6_hours: Option<Period>,
    next_12_hours: Option<Period>,
}

#[derive(Debug, Deserialize)]
struct Instant {
    details: InstantDetails,
}

#[derive(Debug, Default, Deserialize)]
struct InstantDetails {
    air_temperature: Option<f64>,
    air_pressure_at_sea_level: Option<f64>,
    cloud_area_fraction: Option<f64>,
    relative_humidity: Option<f64>,
    dew_point_temperature: Option<f64>,
    /// m/s
    wind_speed: Option<f64>,
    /// m/s
    wind_speed_of_gust: Option<f64>,
    wind_from_direction: Option<f64>,
    ultraviolet_index_clear_sky: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Period {
    summary: Option<Summary>,
    #[serde(default)]
    details: PeriodDetails,
}

#[derive(Debug, Deserialize)]
struct Summary {
    symbol_code: String,
}

#[derive(Debug, Default, Deserialize)]
struct PeriodDetails {
    precipitation_amount: Option<f64>,
    probability_of_precipitation: Option<f64>,
}

impl StepData {
    /// Shortest period that carries a symbol.
    fn symbol(&self) -> Option<&str> {
        [&self.next_1_hours, &self.next_6_hours, &self.next_12_hours]
            .into_iter()
            .flatten()
            .find_map(|p| p.summary.as_ref())
            .map(|s| s.symbol_code.as_str())
    }

    /// Precipitation attributed to this step: the 1h amount while the series
    /// is hourly, the 6h amount once it is not.
    fn precipitation(&self) -> Option<f64> {
        self.next_1_hours
            .as_ref()
            .or(self.next_6_hours.as_ref())
            .and_then(|p| p.details.precipitation_amount)
    }

    fn precipitation_probability(&self) -> Option<f64> {
        [&self.next_1_hours, &self.next_6_hours]
            .into_iter()
            .flatten()
            .find_map(|p| p.details.probability_of_precipitation)
    }
}

#[derive(Debug, Deserialize)]
struct SunResponse {
    properties: SunProperties,
}

#[derive(Debug, Deserialize)]
struct SunProperties {
    sunrise: Option<SunEvent>,
    sunset: Option<SunEvent>,
}

#[derive(Debug, Deserialize)]
struct SunEvent {
    time: Option<String>,
}

/// Map a MET symbol code ("lightrainshowers_day") to a condition.
pub(crate) fn condition_from_symbol(symbol: &str) -> WeatherCondition {
    let base = symbol.split('_').next().unwrap_or(symbol);
    match base {
        "clearsky" => WeatherCondition::Clear,
        "fair" | "partlycloudy" => WeatherCondition::PartlyCloudy,
        "cloudy" => WeatherCondition::Cloudy,
        "fog" => WeatherCondition::Fog,
        s if s.contains("thunder") => WeatherCondition::Thunderstorm,
        s if s.contains("sleet") => WeatherCondition::Sleet,
        s if s.contains("snow") => WeatherCondition::Snow,
        s if s.starts_with("heavyrain") => WeatherCondition::HeavyRain,
        s if s.starts_with("lightrain") => WeatherCondition::Drizzle,
        s if s.contains("rain") => WeatherCondition::Rain,
        _ => WeatherCondition::Clear,
    }
}

/// Local clock of a location: its IANA zone when known, else a longitude estimate.
#[derive(Debug, Clone, Copy)]
enum LocalZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl LocalZone {
    fn for_location(timezone: &str, coordinate: &Coordinate) -> Self {
        if let Ok(tz) = timezone.parse::<Tz>() {
            return Self::Named(tz);
        }
        let hours = (coordinate.longitude / 15.0).round() as i32;
        match FixedOffset::east_opt(hours * 3600) {
            Some(offset) => Self::Fixed(offset),
            None => Self::Fixed(Utc.fix()),
        }
    }

    fn offset_at(&self, time: &DateTime<Utc>) -> FixedOffset {
        match self {
            Self::Named(tz) => tz.offset_from_utc_datetime(&time.naive_utc()).fix(),
            Self::Fixed(offset) => *offset,
        }
    }

    fn local(&self, time: &DateTime<Utc>) -> DateTime<FixedOffset> {
        time.with_timezone(&self.offset_at(time))
    }
}

#[derive(Debug, Default)]
struct DayBucket {
    max: Option<f64>,
    min: Option<f64>,
    precipitation: Option<f64>,
    probability: Option<f64>,
    wind_speed: Option<f64>,
    wind_direction: Option<f64>,
    uv_index: Option<f64>,
    day: Option<WeatherCondition>,
    night: Option<WeatherCondition>,
    offset: Option<FixedOffset>,
}

fn fmax(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn fmin(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn worse(a: Option<WeatherCondition>, b: Option<WeatherCondition>) -> Option<WeatherCondition> {
    match (a, b) {
        (Some(a), Some(b)) if b.severity() > a.severity() => Some(b),
        (a, b) => a.or(b),
    }
}

impl DayBucket {
    fn add(&mut self, step: &Step, local_hour: u32, offset: FixedOffset) {
        let details = &step.data.instant.details;
        self.offset.get_or_insert(offset);
        self.max = fmax(self.max, details.air_temperature);
        self.min = fmin(self.min, details.air_temperature);
        self.uv_index = fmax(self.uv_index, details.ultraviolet_index_clear_sky);
        self.probability = fmax(self.probability, step.data.precipitation_probability());
        if let Some(amount) = step.data.precipitation() {
            self.precipitation = Some(self.precipitation.unwrap_or(0.0) + amount);
        }
        if details.wind_speed > self.wind_speed {
            self.wind_speed = details.wind_speed;
            self.wind_direction = details.wind_from_direction.or(self.wind_direction);
        }

        let condition = step.data.symbol().map(condition_from_symbol);
        if (6..18).contains(&local_hour) {
            self.day = worse(self.day, condition);
        } else {
            self.night = worse(self.night, condition);
        }
    }
}

fn convert_current(step: &Step) -> Result<CurrentWeather, SourceError> {
    let details = &step.data.instant.details;
    let temperature = details
        .air_temperature
        .ok_or_else(|| SourceError::Parse("timeseries entry without air_temperature".to_string()))?;
    Ok(CurrentWeather {
        condition: step
            .data
            .symbol()
            .map(condition_from_symbol)
            .unwrap_or_default(),
        text: None,
        temperature,
        feels_like: None,
        humidity: details.relative_humidity,
        wind: Wind {
            speed: details.wind_speed.map(|v| v * MS_TO_KMH),
            direction: details.wind_from_direction,
            gusts: details.wind_speed_of_gust.map(|v| v * MS_TO_KMH),
        },
        pressure: details.air_pressure_at_sea_level,
        visibility: None,
        dew_point: details.dew_point_temperature,
        cloud_cover: details.cloud_area_fraction,
        uv_index: details.ultraviolet_index_clear_sky,
        air_quality: None,
    })
}

fn convert_hourly(steps: &[Step], hours: usize) -> Vec<HourlyForecast> {
    steps
        .iter()
        .filter(|s| s.data.next_1_hours.is_some())
        .take(hours)
        .filter_map(|step| {
            let details = &step.data.instant.details;
            Some(HourlyForecast {
                time: step.time,
                condition: step.data.symbol().map(condition_from_symbol).unwrap_or_default(),
                temperature: details.air_temperature?,
                precipitation: step.data.precipitation(),
                precipitation_probability: step.data.precipitation_probability(),
                wind: Wind {
                    speed: details.wind_speed.map(|v| v * MS_TO_KMH),
                    direction: details.wind_from_direction,
                    gusts: details.wind_speed_of_gust.map(|v| v * MS_TO_KMH),
                },
                humidity: details.relative_humidity,
            })
        })
        .collect()
}

fn aggregate_daily(steps: &[Step], zone: LocalZone, days: usize) -> Vec<(DailyForecast, FixedOffset)> {
    let mut buckets: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();
    for step in steps {
        let local = zone.local(&step.time);
        buckets
            .entry(local.date_naive())
            .or_default()
            .add(step, local.hour(), *local.offset());
    }

    buckets
        .into_iter()
        .filter_map(|(date, bucket)| {
            let day = bucket.day.or(bucket.night).unwrap_or_default();
            let forecast = DailyForecast {
                date,
                condition_day: day,
                condition_night: bucket.night.unwrap_or(day),
                temperature_max: bucket.max?,
                temperature_min: bucket.min?,
                precipitation: bucket.precipitation,
                precipitation_probability: bucket.probability,
                wind: Wind {
                    speed: bucket.wind_speed.map(|v| v * MS_TO_KMH),
                    direction: bucket.wind_direction,
                    gusts: None,
                },
                sunrise: None,
                sunset: None,
                uv_index: bucket.uv_index,
            };
            Some((forecast, bucket.offset.unwrap_or(Utc.fix())))
        })
        .take(days)
        .collect()
}

pub struct MetNoClient {
    http: HttpClient,
    base_url: String,
    language: String,
    window: ForecastWindow,
    geocoding: GeocodingSearch,
    nominatim: NominatimClient,
}

impl MetNoClient {
    pub fn new(
        http: HttpClient,
        config: &WeatherConfig,
        geocoding: GeocodingSearch,
        nominatim: NominatimClient,
    ) -> Self {
        Self {
            http,
            base_url: config.base_url(WeatherSource::MetNo).trim_end_matches('/').to_string(),
            language: config.language.clone(),
            window: ForecastWindow::for_source(config, WeatherSource::MetNo),
            geocoding,
            nominatim,
        }
    }

    async fn forecast(&self, coordinate: &Coordinate) -> Result<ForecastResponse, SourceError> {
        let url = format!("{}/weatherapi/locationforecast/2.0/complete", self.base_url);
        // MET rejects coordinates with more than four decimals
        self.http
            .get_json(
                &url,
                &[
                    ("lat", format!("{:.4}", coordinate.latitude)),
                    ("lon", format!("{:.4}", coordinate.longitude)),
                ],
            )
            .await
    }

    async fn sun(
        &self,
        coordinate: &Coordinate,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), SourceError> {
        let url = format!("{}/weatherapi/sunrise/3.0/sun", self.base_url);
        let body: SunResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("lat", format!("{:.4}", coordinate.latitude)),
                    ("lon", format!("{:.4}", coordinate.longitude)),
                    ("date", date.format("%Y-%m-%d").to_string()),
                    ("offset", offset.to_string()),
                ],
            )
            .await?;

        let event = |e: Option<SunEvent>| {
            e.and_then(|e| e.time)
                .and_then(|t| parse_time(&t))
                .map(|t| t.with_timezone(&Utc))
        };
        Ok((event(body.properties.sunrise), event(body.properties.sunset)))
    }
}

#[async_trait]
impl WeatherSourceClient for MetNoClient {
    fn source(&self) -> WeatherSource {
        WeatherSource::MetNo
    }

    async fn search(&self, query: &str) -> Result<Vec<Location>, SourceError> {
        self.geocoding
            .search(query, &self.language, WeatherSource::MetNo)
            .await
    }

    async fn reverse_geocode(&self, location: &Location) -> Result<Location, SourceError> {
        reverse_geocode_or_passthrough(&self.nominatim, location).await
    }

    #[instrument(skip_all, fields(id = %location.formatted_id), level = "info")]
    async fn request_weather(&self, location: &Location) -> Result<Weather, SourceError> {
        let coordinate = require_coordinate(location)?;
        let forecast = self.forecast(&coordinate).await?;
        let steps = forecast.properties.timeseries;

        let first = steps
            .first()
            .ok_or_else(|| SourceError::EmptyResult("MET Norway timeseries".to_string()))?;
        let current = convert_current(first)?;
        let hourly = convert_hourly(&steps, self.window.hourly_hours as usize);

        let zone = LocalZone::for_location(&location.timezone, &coordinate);
        let days = aggregate_daily(&steps, zone, self.window.daily_days as usize);

        let sun_times = join_all(
            days.iter()
                .map(|(day, offset)| self.sun(&coordinate, day.date, *offset)),
        )
        .await;

        let daily = days
            .into_iter()
            .zip(sun_times)
            .map(|((mut day, _), sun)| {
                match sun {
                    Ok((sunrise, sunset)) => {
                        day.sunrise = sunrise;
                        day.sunset = sunset;
                    }
                    Err(e) => tracing::debug!("Sunrise lookup for {} failed: {}", day.date, e),
                }
                day
            })
            .collect();

        Ok(Weather {
            base: WeatherBase {
                city_id: location.city_id.clone(),
                publish_time: forecast.properties.meta.updated_at,
                update_time: Utc::now(),
            },
            current,
            hourly,
            daily,
            alerts: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::retry::RetryConfig;
    use std::time::Duration;
    use wiremock::matchers::{path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> MetNoClient {
        let mut config = WeatherConfig::default();
        config.metno.base_url = Some(server.uri());
        let http = HttpClient::new("nimbus-test", Duration::from_secs(5), RetryConfig::none()).unwrap();
        MetNoClient::new(
            http.clone(),
            &config,
            GeocodingSearch::new(http.clone(), &server.uri()),
            NominatimClient::new(http, server.uri(), "en"),
        )
    }

    fn step(time: &str, temperature: f64, symbol: &str, precipitation: f64) -> serde_json::Value {
        serde_json::json!({
            "time": time,
            "data": {
                "instant": { "details": {
                    "air_temperature": temperature,
                    "air_pressure_at_sea_level": 1012.0,
                    "relative_humidity": 70.0,
                    "wind_speed": 5.0,
                    "wind_from_direction": 200.0
                }},
                "next_1_hours": {
                    "summary": { "symbol_code": symbol },
                    "details": { "precipitation_amount": precipitation }
                }
            }
        })
    }

    fn oslo() -> Location {
        Location::resident(
            "",
            Coordinate::new(59.91273, 10.74609),
            "UTC",
            GeocodeInfo::default(),
            WeatherSource::MetNo,
        )
    }

    #[test]
    fn test_symbol_codes() {
        assert_eq!(condition_from_symbol("clearsky_day"), WeatherCondition::Clear);
        assert_eq!(condition_from_symbol("fair_night"), WeatherCondition::PartlyCloudy);
        assert_eq!(condition_from_symbol("heavyrainshowers_day"), WeatherCondition::HeavyRain);
        assert_eq!(condition_from_symbol("lightrain"), WeatherCondition::Drizzle);
        assert_eq!(condition_from_symbol("rainandthunder"), WeatherCondition::Thunderstorm);
        assert_eq!(condition_from_symbol("lightsleetshowers_polartwilight"), WeatherCondition::Sleet);
        assert_eq!(condition_from_symbol("snow"), WeatherCondition::Snow);
    }

    #[test]
    fn test_zone_falls_back_to_longitude() {
        let zone = LocalZone::for_location("auto", &Coordinate::new(35.0, 139.7));
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(zone.offset_at(&noon).local_minus_utc(), 9 * 3600);

        let named = LocalZone::for_location("Europe/Oslo", &Coordinate::new(59.9, 10.7));
        assert_eq!(named.offset_at(&noon).local_minus_utc(), 2 * 3600);
    }

    #[tokio::test]
    async fn test_request_weather_aggregates_days() {
        let server = MockServer::start().await;
        Mock::given(path("/weatherapi/locationforecast/2.0/complete"))
            .and(query_param("lat", "59.9127"))
            .and(query_param("lon", "10.7461"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "Feature",
                "properties": {
                    "meta": { "updated_at": "2024-05-01T08:00:00Z" },
                    "timeseries": [
                        step("2024-05-01T03:00:00Z", 6.0, "clearsky_night", 0.0),
                        step("2024-05-01T12:00:00Z", 14.0, "rainshowers_day", 1.5),
                        step("2024-05-01T15:00:00Z", 12.0, "cloudy", 0.5),
                        step("2024-05-02T12:00:00Z", 16.0, "fair_day", 0.0)
                    ]
                }
            })))
            .mount(&server)
            .await;
        Mock::given(path("/weatherapi/sunrise/3.0/sun"))
            .and(query_param("date", "2024-05-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": {
                    "sunrise": { "time": "2024-05-01T05:02+00:00" },
                    "sunset": { "time": "2024-05-01T19:40+00:00" }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(path("/weatherapi/sunrise/3.0/sun"))
            .and(query_param("date", "2024-05-02"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let weather = client(&server).request_weather(&oslo()).await.unwrap();

        assert_eq!(weather.current.temperature, 6.0);
        assert_eq!(weather.current.condition, WeatherCondition::Clear);
        assert!((weather.current.wind.speed.unwrap() - 18.0).abs() < 1e-9);
        assert_eq!(weather.hourly.len(), 4);

        assert_eq!(weather.daily.len(), 2);
        let today = &weather.daily[0];
        assert_eq!(today.date.to_string(), "2024-05-01");
        assert_eq!(today.temperature_max, 14.0);
        assert_eq!(today.temperature_min, 6.0);
        assert_eq!(today.precipitation, Some(2.0));
        assert_eq!(today.condition_day, WeatherCondition::Rain);
        assert_eq!(today.condition_night, WeatherCondition::Clear);
        assert_eq!(
            today.sunrise.map(|t| t.to_rfc3339()),
            Some("2024-05-01T05:02:00+00:00".to_string())
        );
        // Sunrise failures leave the day without sun times
        assert_eq!(weather.daily[1].sunrise, None);
        assert_eq!(weather.base.publish_time.to_rfc3339(), "2024-05-01T08:00:00+00:00");
    }

    #[tokio::test]
    async fn test_empty_timeseries_is_empty_result() {
        let server = MockServer::start().await;
        Mock::given(path("/weatherapi/locationforecast/2.0/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": { "meta": { "updated_at": "2024-05-01T08:00:00Z" }, "timeseries": [] }
            })))
            .mount(&server)
            .await;

        let result = client(&server).request_weather(&oslo()).await;
        assert!(matches!(result, Err(SourceError::EmptyResult(_))));
    }

    #[tokio::test]
    async fn test_missing_coordinate() {
        let server = MockServer::start().await;
        let result = client(&server)
            .request_weather(&Location::current_position(WeatherSource::MetNo))
            .await;
        assert!(matches!(result, Err(SourceError::MissingCoordinate)));
    }
}
