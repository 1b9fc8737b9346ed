use chrono::{DateTime, NaiveDate, Utc};
use nimbus_core::WeatherSource;
use serde::{Deserialize, Serialize};

/// Formatted id of the single current-position record.
pub const CURRENT_POSITION_ID: &str = "CURRENT_POSITION";

/// Weather condition categories shared by every source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Haze,
    Wind,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Hail,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 => Self::Sleet, // Freezing drizzle
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            66 | 67 => Self::Sleet, // Freezing rain
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 => Self::Thunderstorm,
            96 | 99 => Self::Hail, // Thunderstorm with hail
            _ => Self::Clear, // Unknown codes default to clear
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Haze => "Haze",
            Self::Wind => "Windy",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Hail => "Hail",
            Self::Thunderstorm => "Thunderstorm",
        }
    }

    /// Get icon name
    pub fn icon_name(&self) -> &'static str {
        match self {
            Self::Clear => "sun",
            Self::PartlyCloudy => "cloud_sun",
            Self::Cloudy => "cloud",
            Self::Fog | Self::Haze => "cloud_fog",
            Self::Wind => "wind",
            Self::Drizzle | Self::Rain | Self::HeavyRain => "cloud_rain",
            Self::Snow | Self::Sleet => "cloud_snow",
            Self::Hail => "cloud_hail",
            Self::Thunderstorm => "cloud_lightning",
        }
    }

    /// Rank used when several conditions compete for one summary slot
    /// (e.g. picking a day's condition from its hours).
    pub fn severity(&self) -> u8 {
        match self {
            Self::Clear => 0,
            Self::PartlyCloudy => 1,
            Self::Cloudy => 2,
            Self::Haze => 3,
            Self::Fog => 4,
            Self::Wind => 5,
            Self::Drizzle => 6,
            Self::Rain => 7,
            Self::Sleet => 8,
            Self::Snow => 9,
            Self::HeavyRain => 10,
            Self::Hail => 11,
            Self::Thunderstorm => 12,
        }
    }
}

/// A point on the globe in WGS-84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// Administrative names attached to a coordinate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocodeInfo {
    pub country: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    #[serde(default)]
    pub in_china: bool,
}

impl GeocodeInfo {
    pub fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.province.is_none()
            && self.city.is_none()
            && self.district.is_none()
    }

    /// Short place name, e.g. "Haidian, Beijing" or "Seattle, Washington".
    pub fn display_name(&self) -> Option<String> {
        let place = self
            .district
            .as_deref()
            .or(self.city.as_deref())
            .or(self.province.as_deref())
            .or(self.country.as_deref())?;

        let suffix = [self.city.as_deref(), self.province.as_deref(), self.country.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty() && *s != place);

        Some(match suffix {
            Some(s) => format!("{}, {}", place, s),
            None => place.to_string(),
        })
    }
}

/// A saved place, or the device's current position, bound to one weather source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub formatted_id: String,
    /// Provider-specific key; empty until geocoded
    #[serde(default)]
    pub city_id: String,
    pub coordinate: Option<Coordinate>,
    /// IANA zone name, or "auto" to let the provider decide
    pub timezone: String,
    #[serde(default)]
    pub geocode: GeocodeInfo,
    pub weather_source: WeatherSource,
    pub is_current_position: bool,
    pub is_resident: bool,
    #[serde(default)]
    pub weather: Option<Weather>,
}

impl Location {
    /// The record tracking the device position. It has no coordinate until
    /// the first successful fix.
    pub fn current_position(source: WeatherSource) -> Self {
        Self {
            formatted_id: CURRENT_POSITION_ID.to_string(),
            city_id: String::new(),
            coordinate: None,
            timezone: "auto".to_string(),
            geocode: GeocodeInfo::default(),
            weather_source: source,
            is_current_position: true,
            is_resident: false,
            weather: None,
        }
    }

    /// A user-pinned location.
    pub fn resident(
        city_id: impl Into<String>,
        coordinate: Coordinate,
        timezone: impl Into<String>,
        geocode: GeocodeInfo,
        source: WeatherSource,
    ) -> Self {
        let city_id = city_id.into();
        Self {
            formatted_id: Self::build_formatted_id(&city_id, &coordinate, source),
            city_id,
            coordinate: Some(coordinate),
            timezone: timezone.into(),
            geocode,
            weather_source: source,
            is_current_position: false,
            is_resident: true,
            weather: None,
        }
    }

    pub fn build_formatted_id(city_id: &str, coordinate: &Coordinate, source: WeatherSource) -> String {
        format!(
            "{}&{:.4}&{:.4}&{}",
            city_id,
            coordinate.latitude,
            coordinate.longitude,
            source.id()
        )
    }

    /// Whether weather can be requested for this location.
    pub fn is_usable(&self) -> bool {
        !self.city_id.is_empty() || self.coordinate.is_some_and(|c| c.is_valid())
    }

    /// Apply a fresh position fix, keeping the record's identity.
    ///
    /// When the position moved, the provider key and names of the old position
    /// are dropped unless the provider supplied new names.
    pub fn apply_fix(&mut self, coordinate: Coordinate, geocode: Option<GeocodeInfo>) {
        let moved = self.coordinate != Some(coordinate);
        if moved {
            self.city_id.clear();
        }
        self.coordinate = Some(coordinate);
        match geocode {
            Some(geocode) => self.geocode = geocode,
            None if moved => self.geocode = GeocodeInfo::default(),
            None => {}
        }
    }

    pub fn display_name(&self) -> String {
        if let Some(name) = self.geocode.display_name() {
            return name;
        }
        match (&self.coordinate, self.is_current_position) {
            (Some(c), _) => c.to_string(),
            (None, true) => "Current position".to_string(),
            (None, false) => self.formatted_id.clone(),
        }
    }
}

/// Publication metadata for a weather bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherBase {
    pub city_id: String,
    /// When the provider generated the data
    pub publish_time: DateTime<Utc>,
    /// When this client fetched it
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    /// km/h
    pub speed: Option<f64>,
    /// Degrees, meteorological (direction the wind comes from)
    pub direction: Option<f64>,
    /// km/h
    pub gusts: Option<f64>,
}

/// Pollutant concentrations in µg/m³, except `co` in mg/m³.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    pub aqi: Option<f64>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub so2: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub co: Option<f64>,
}

impl AirQuality {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Current weather conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub condition: WeatherCondition,
    /// Provider wording, when it sends one
    pub text: Option<String>,
    /// °C
    pub temperature: f64,
    /// °C
    pub feels_like: Option<f64>,
    /// %
    pub humidity: Option<f64>,
    pub wind: Wind,
    /// hPa
    pub pressure: Option<f64>,
    /// km
    pub visibility: Option<f64>,
    /// °C
    pub dew_point: Option<f64>,
    /// %
    pub cloud_cover: Option<f64>,
    pub uv_index: Option<f64>,
    pub air_quality: Option<AirQuality>,
}

/// Hourly forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub time: DateTime<Utc>,
    pub condition: WeatherCondition,
    /// °C
    pub temperature: f64,
    /// mm
    pub precipitation: Option<f64>,
    /// %
    pub precipitation_probability: Option<f64>,
    pub wind: Wind,
    /// %
    pub humidity: Option<f64>,
}

/// Daily forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub condition_day: WeatherCondition,
    pub condition_night: WeatherCondition,
    /// °C
    pub temperature_max: f64,
    /// °C
    pub temperature_min: f64,
    /// mm
    pub precipitation: Option<f64>,
    /// %
    pub precipitation_probability: Option<f64>,
    pub wind: Wind,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub uv_index: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    #[default]
    Minor,
    Moderate,
    Severe,
    Extreme,
}

/// Weather warning issued for the location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: AlertSeverity,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Complete weather bundle in canonical units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub base: WeatherBase,
    pub current: CurrentWeather,
    pub hourly: Vec<HourlyForecast>,
    pub daily: Vec<DailyForecast>,
    pub alerts: Vec<Alert>,
}

impl Weather {
    /// Today's entry, when the provider sent one.
    pub fn today(&self) -> Option<&DailyForecast> {
        self.daily.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wmo_code_clear() {
        assert_eq!(WeatherCondition::from_wmo_code(0), WeatherCondition::Clear);
    }

    #[test]
    fn test_wmo_code_partly_cloudy() {
        assert_eq!(WeatherCondition::from_wmo_code(1), WeatherCondition::PartlyCloudy);
        assert_eq!(WeatherCondition::from_wmo_code(2), WeatherCondition::PartlyCloudy);
    }

    #[test]
    fn test_wmo_code_fog() {
        assert_eq!(WeatherCondition::from_wmo_code(45), WeatherCondition::Fog);
        assert_eq!(WeatherCondition::from_wmo_code(48), WeatherCondition::Fog);
    }

    #[test]
    fn test_wmo_code_rain() {
        assert_eq!(WeatherCondition::from_wmo_code(61), WeatherCondition::Rain);
        assert_eq!(WeatherCondition::from_wmo_code(65), WeatherCondition::HeavyRain);
        assert_eq!(WeatherCondition::from_wmo_code(66), WeatherCondition::Sleet);
    }

    #[test]
    fn test_wmo_code_snow() {
        for code in [71, 73, 75, 77, 85, 86] {
            assert_eq!(WeatherCondition::from_wmo_code(code), WeatherCondition::Snow);
        }
    }

    #[test]
    fn test_wmo_code_thunderstorm_and_hail() {
        assert_eq!(WeatherCondition::from_wmo_code(95), WeatherCondition::Thunderstorm);
        assert_eq!(WeatherCondition::from_wmo_code(96), WeatherCondition::Hail);
        assert_eq!(WeatherCondition::from_wmo_code(99), WeatherCondition::Hail);
    }

    #[test]
    fn test_wmo_code_unknown_defaults_to_clear() {
        assert_eq!(WeatherCondition::from_wmo_code(999), WeatherCondition::Clear);
        assert_eq!(WeatherCondition::from_wmo_code(-1), WeatherCondition::Clear);
    }

    #[test]
    fn test_severity_orders_storms_last() {
        assert!(WeatherCondition::Thunderstorm.severity() > WeatherCondition::Rain.severity());
        assert!(WeatherCondition::Rain.severity() > WeatherCondition::Cloudy.severity());
    }

    #[test]
    fn test_formatted_id() {
        let id = Location::build_formatted_id(
            "12345",
            &Coordinate::new(39.9042, 116.40739),
            WeatherSource::Accu,
        );
        assert_eq!(id, "12345&39.9042&116.4074&accu");
    }

    #[test]
    fn test_current_position_not_usable_until_fix() {
        let mut location = Location::current_position(WeatherSource::OpenMeteo);
        assert_eq!(location.formatted_id, CURRENT_POSITION_ID);
        assert!(!location.is_usable());

        location.apply_fix(Coordinate::new(47.6, -122.3), None);
        assert!(location.is_usable());
        assert_eq!(location.formatted_id, CURRENT_POSITION_ID);
    }

    #[test]
    fn test_apply_fix_clears_stale_city_id() {
        let mut location = Location::resident(
            "abc",
            Coordinate::new(1.0, 2.0),
            "UTC",
            GeocodeInfo::default(),
            WeatherSource::Accu,
        );
        location.geocode.city = Some("Old Town".into());
        location.apply_fix(Coordinate::new(1.0, 2.0), None);
        assert_eq!(location.city_id, "abc");
        assert_eq!(location.geocode.city.as_deref(), Some("Old Town"));
        location.apply_fix(Coordinate::new(3.0, 4.0), None);
        assert!(location.city_id.is_empty());
        assert!(location.geocode.is_empty());
    }

    #[test]
    fn test_geocode_display_name() {
        let geocode = GeocodeInfo {
            country: Some("China".into()),
            province: Some("北京市".into()),
            city: Some("北京市".into()),
            district: Some("海淀区".into()),
            in_china: true,
        };
        assert_eq!(geocode.display_name().as_deref(), Some("海淀区, 北京市"));

        let municipality = GeocodeInfo {
            province: Some("北京市".into()),
            city: Some("北京市".into()),
            ..Default::default()
        };
        assert_eq!(municipality.display_name().as_deref(), Some("北京市"));
    }

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(39.93, 116.40).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::NAN).is_valid());
    }
}
