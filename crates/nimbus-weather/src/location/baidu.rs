use async_trait::async_trait;
use nimbus_core::LocationProviderKind;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{LocationProvider, NativeLocationProvider, Permission, Position, LOCATION_PERMISSIONS};
use crate::error::SourceError;
use crate::http::HttpClient;
use crate::types::{Coordinate, GeocodeInfo};

#[derive(Debug, Deserialize)]
struct ReverseGeocodingResponse {
    status: i32,
    #[serde(default)]
    message: Option<String>,
    result: Option<ReverseGeocodingResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReverseGeocodingResult {
    address_component: AddressComponent,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    #[serde(default)]
    country: String,
    /// 0 for China
    #[serde(default = "unknown_country")]
    country_code: i32,
    #[serde(default)]
    province: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    district: String,
}

fn unknown_country() -> i32 {
    -1
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}

/// Native fix enriched with Baidu reverse geocoding.
pub struct BaiduLocationProvider {
    native: NativeLocationProvider,
    http: HttpClient,
    base_url: String,
    ak: String,
}

impl BaiduLocationProvider {
    pub fn new(native: NativeLocationProvider, http: HttpClient, base_url: &str, ak: &str) -> Self {
        Self {
            native,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            ak: ak.to_string(),
        }
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn reverse_geocode(&self, coordinate: &Coordinate) -> Result<GeocodeInfo, SourceError> {
        let url = format!("{}/reverse_geocoding/v3/", self.base_url);
        let body: ReverseGeocodingResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("ak", self.ak.clone()),
                    ("output", "json".to_string()),
                    ("coordtype", "wgs84ll".to_string()),
                    (
                        "location",
                        format!("{},{}", coordinate.latitude, coordinate.longitude),
                    ),
                ],
            )
            .await?;

        if body.status != 0 {
            return Err(SourceError::Status {
                status: body.status as u16,
                message: body.message.unwrap_or_default(),
            });
        }

        let component = body
            .result
            .ok_or_else(|| SourceError::EmptyResult("baidu reverse geocoding".to_string()))?
            .address_component;

        Ok(GeocodeInfo {
            in_china: component.country_code == 0,
            country: non_empty(component.country),
            province: non_empty(component.province),
            city: non_empty(component.city),
            district: non_empty(component.district),
        })
    }
}

#[async_trait]
impl LocationProvider for BaiduLocationProvider {
    fn kind(&self) -> LocationProviderKind {
        LocationProviderKind::Baidu
    }

    fn permissions(&self) -> &'static [Permission] {
        LOCATION_PERMISSIONS
    }

    fn requires_network(&self) -> bool {
        true
    }

    async fn request_location(&self, cancel: &CancellationToken) -> Option<Position> {
        let coordinate = self.native.fix(cancel).await?;

        let geocode = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.reverse_geocode(&coordinate) => result,
        };

        // A fix without names is still a fix
        let geocode = geocode
            .map_err(|e| tracing::warn!("Baidu reverse geocoding failed: {}", e))
            .ok();
        Some(Position {
            coordinate,
            geocode,
        })
    }
}
