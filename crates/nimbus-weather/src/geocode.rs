//! Reverse geocoding: convert coordinates to administrative names.
//! Uses Nominatim (OpenStreetMap) - free, no API key required.

use serde::Deserialize;

use crate::error::SourceError;
use crate::http::HttpClient;
use crate::types::{Coordinate, GeocodeInfo};

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    city_district: Option<String>,
    suburb: Option<String>,
    district: Option<String>,
    state_district: Option<String>,
    county: Option<String>,
    state: Option<String>,
    province: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NominatimClient {
    http: HttpClient,
    base_url: String,
    language: String,
}

impl NominatimClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            language: language.into(),
        }
    }

    /// Reverse geocode a coordinate into administrative names.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn reverse(&self, coordinate: &Coordinate) -> Result<GeocodeInfo, SourceError> {
        let url = format!("{}/reverse", self.base_url.trim_end_matches('/'));
        let body: NominatimResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("lat", coordinate.latitude.to_string()),
                    ("lon", coordinate.longitude.to_string()),
                    ("format", "json".to_string()),
                    ("addressdetails", "1".to_string()),
                    ("zoom", "10".to_string()),
                    ("accept-language", self.language.clone()),
                ],
            )
            .await?;

        if let Some(error) = body.error {
            return Err(SourceError::EmptyResult(error));
        }
        let addr = body
            .address
            .ok_or_else(|| SourceError::EmptyResult(format!("reverse geocode {}", coordinate)))?;

        // Prefer city > town > village > municipality for the primary place name
        let city = addr
            .city
            .or(addr.town)
            .or(addr.village)
            .or(addr.municipality)
            .or(addr.state_district)
            .or(addr.county);
        let district = addr.city_district.or(addr.district).or(addr.suburb);
        let province = addr.state.or(addr.province);
        let in_china = addr
            .country_code
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case("cn"));

        let info = GeocodeInfo {
            country: addr.country,
            province,
            city,
            district,
            in_china,
        };

        if info.is_empty() {
            return Err(SourceError::EmptyResult(format!("reverse geocode {}", coordinate)));
        }

        tracing::info!("Reverse geocoded to: {}", info.display_name().unwrap_or_default());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::retry::RetryConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> NominatimClient {
        let http = HttpClient::new("nimbus-test", Duration::from_secs(5), RetryConfig::none()).unwrap();
        NominatimClient::new(http, base, "en")
    }

    #[tokio::test]
    async fn test_reverse_geocode_seattle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .and(query_param("lat", "47.6062"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "display_name": "Seattle, King County, Washington, United States",
                "address": {
                    "city": "Seattle",
                    "county": "King County",
                    "state": "Washington",
                    "country": "United States",
                    "country_code": "us"
                }
            })))
            .mount(&server)
            .await;

        let info = client(&server.uri())
            .reverse(&Coordinate::new(47.6062, -122.3321))
            .await
            .unwrap();
        assert_eq!(info.city.as_deref(), Some("Seattle"));
        assert_eq!(info.province.as_deref(), Some("Washington"));
        assert!(!info.in_china);
    }

    #[tokio::test]
    async fn test_reverse_geocode_flags_china() {
        let server = MockServer::start().await;
        Mock::given(path("/reverse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "address": {
                    "city_district": "海淀区",
                    "city": "北京市",
                    "country": "中国",
                    "country_code": "cn"
                }
            })))
            .mount(&server)
            .await;

        let info = client(&server.uri())
            .reverse(&Coordinate::new(39.96, 116.30))
            .await
            .unwrap();
        assert!(info.in_china);
        assert_eq!(info.district.as_deref(), Some("海淀区"));
    }

    #[tokio::test]
    async fn test_reverse_geocode_ocean_is_empty() {
        let server = MockServer::start().await;
        Mock::given(path("/reverse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"error": "Unable to geocode"})),
            )
            .mount(&server)
            .await;

        let result = client(&server.uri()).reverse(&Coordinate::new(0.0, -30.0)).await;
        assert!(matches!(result, Err(SourceError::EmptyResult(_))));
    }
}
