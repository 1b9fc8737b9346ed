//! Identities of the pluggable location and weather providers.
//!
//! Configuration selects one variant of each enum; the weather and services
//! crates map the variant onto a concrete client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Forecast provider bound to a saved location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherSource {
    #[default]
    OpenMeteo,
    MetNo,
    Accu,
    CaiYun,
    /// China Weather (weather.com.cn). Known so stored locations bound to it
    /// load, but no client ships for it.
    Cn,
}

impl WeatherSource {
    pub const ALL: [WeatherSource; 5] = [
        WeatherSource::OpenMeteo,
        WeatherSource::MetNo,
        WeatherSource::Accu,
        WeatherSource::CaiYun,
        WeatherSource::Cn,
    ];

    /// Stable identifier used in formatted ids, config files and the database.
    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenMeteo => "open_meteo",
            Self::MetNo => "metno",
            Self::Accu => "accu",
            Self::CaiYun => "caiyun",
            Self::Cn => "cn",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenMeteo => "Open-Meteo",
            Self::MetNo => "MET Norway",
            Self::Accu => "AccuWeather",
            Self::CaiYun => "CaiYun",
            Self::Cn => "China Weather",
        }
    }

    /// Production endpoint of the forecast API.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenMeteo => "https://api.open-meteo.com",
            Self::MetNo => "https://api.met.no",
            Self::Accu => "https://dataservice.accuweather.com",
            Self::CaiYun => "https://api.caiyunapp.com",
            Self::Cn => "https://www.weather.com.cn",
        }
    }

    /// Whether a weather client exists for this source.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Cn)
    }

    /// Whether requests carry an API key or token.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::Accu | Self::CaiYun)
    }

    /// Whether a provider-specific location key must be obtained by reverse
    /// geocoding before weather can be requested.
    pub fn needs_geocode(&self) -> bool {
        matches!(self, Self::Accu)
    }

    /// Whether the provider itself offers reverse geocoding. Sources without
    /// it go through Nominatim and fall back to coordinate passthrough.
    pub fn supports_reverse_geocode(&self) -> bool {
        matches!(self, Self::Accu)
    }

    /// Longest daily forecast the provider serves.
    pub fn max_daily_days(&self) -> u8 {
        match self {
            Self::OpenMeteo => 16,
            Self::MetNo => 10,
            Self::Accu => 15,
            Self::CaiYun => 15,
            Self::Cn => 15,
        }
    }

    /// Longest hourly forecast the provider serves.
    pub fn max_hourly_hours(&self) -> u16 {
        match self {
            Self::OpenMeteo => 384,
            Self::MetNo => 48,
            Self::Accu => 120,
            Self::CaiYun => 360,
            Self::Cn => 24,
        }
    }
}

impl fmt::Display for WeatherSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for WeatherSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| format!("unknown weather source: {}", s))
    }
}

/// Backend used to resolve the device position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocationProviderKind {
    /// Platform positioning (GeoClue2 on Linux).
    #[default]
    Native,
    /// Native fix enriched by Baidu reverse geocoding.
    Baidu,
    /// Baidu IP geolocation, no permissions required.
    BaiduIp,
    /// Native fix enriched by AMap reverse geocoding.
    #[serde(rename = "amap")]
    AMap,
}

impl LocationProviderKind {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Baidu => "baidu",
            Self::BaiduIp => "baidu_ip",
            Self::AMap => "amap",
        }
    }

    pub fn is_ip_based(&self) -> bool {
        matches!(self, Self::BaiduIp)
    }
}

impl fmt::Display for LocationProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for LocationProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "baidu" => Ok(Self::Baidu),
            "baidu_ip" => Ok(Self::BaiduIp),
            "amap" => Ok(Self::AMap),
            other => Err(format!("unknown location provider: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_round_trip() {
        for source in WeatherSource::ALL {
            assert_eq!(WeatherSource::from_id(source.id()), Some(source));
            assert_eq!(source.to_string().parse::<WeatherSource>(), Ok(source));
        }
        assert_eq!(WeatherSource::from_id("cn"), Some(WeatherSource::Cn));
        assert_eq!(WeatherSource::from_id("weather_com"), None);
    }

    #[test]
    fn test_only_accu_needs_geocode() {
        let needing: Vec<_> = WeatherSource::ALL
            .into_iter()
            .filter(WeatherSource::needs_geocode)
            .collect();
        assert_eq!(needing, vec![WeatherSource::Accu]);
    }

    #[test]
    fn test_only_cn_lacks_a_client() {
        let unsupported: Vec<_> = WeatherSource::ALL
            .into_iter()
            .filter(|s| !s.is_supported())
            .collect();
        assert_eq!(unsupported, vec![WeatherSource::Cn]);
    }

    #[test]
    fn test_keyed_sources() {
        assert!(WeatherSource::Accu.requires_api_key());
        assert!(WeatherSource::CaiYun.requires_api_key());
        assert!(!WeatherSource::OpenMeteo.requires_api_key());
        assert!(!WeatherSource::MetNo.requires_api_key());
    }

    #[test]
    fn test_provider_kind_serde_names() {
        let kind: LocationProviderKind = serde_json::from_str("\"amap\"").unwrap_or_default();
        assert_eq!(kind, LocationProviderKind::AMap);
        assert_eq!("baidu_ip".parse(), Ok(LocationProviderKind::BaiduIp));
        assert!(LocationProviderKind::BaiduIp.is_ip_based());
        assert!(!LocationProviderKind::Native.is_ip_based());
    }
}
