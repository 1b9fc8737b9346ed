use async_trait::async_trait;
use nimbus_core::LocationProviderKind;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{LocationProvider, NativeLocationProvider, Permission, Position, LOCATION_PERMISSIONS};
use crate::coord::wgs84_to_gcj02;
use crate::error::SourceError;
use crate::http::HttpClient;
use crate::types::{Coordinate, GeocodeInfo};

#[derive(Debug, Deserialize)]
struct RegeoResponse {
    /// "1" on success
    status: String,
    #[serde(default)]
    info: String,
    #[serde(default)]
    infocode: String,
    regeocode: Option<Regeocode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Regeocode {
    address_component: RegeoAddress,
}

/// Empty fields are sent as `[]` instead of strings.
#[derive(Debug, Deserialize)]
struct RegeoAddress {
    #[serde(default)]
    country: Value,
    #[serde(default)]
    province: Value,
    #[serde(default)]
    city: Value,
    #[serde(default)]
    district: Value,
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Native fix enriched with AMap (Gaode) reverse geocoding.
pub struct AMapLocationProvider {
    native: NativeLocationProvider,
    http: HttpClient,
    base_url: String,
    key: String,
}

impl AMapLocationProvider {
    pub fn new(native: NativeLocationProvider, http: HttpClient, base_url: &str, key: &str) -> Self {
        Self {
            native,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        }
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn reverse_geocode(&self, coordinate: &Coordinate) -> Result<GeocodeInfo, SourceError> {
        let gcj = wgs84_to_gcj02(coordinate);
        let url = format!("{}/v3/geocode/regeo", self.base_url);
        let body: RegeoResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("key", self.key.clone()),
                    // AMap wants longitude first
                    ("location", format!("{:.6},{:.6}", gcj.longitude, gcj.latitude)),
                    ("extensions", "base".to_string()),
                    ("output", "JSON".to_string()),
                ],
            )
            .await?;

        if body.status != "1" {
            let message = format!("{} ({})", body.info, body.infocode);
            return Err(match body.infocode.as_str() {
                "10001" | "10003" | "10004" | "10044" => SourceError::ApiLimit(message),
                _ => SourceError::Status {
                    status: 200,
                    message,
                },
            });
        }

        let address = body
            .regeocode
            .ok_or_else(|| SourceError::EmptyResult("amap regeo".to_string()))?
            .address_component;

        let province = text(address.province);
        let country = text(address.country);
        let in_china = country.as_deref() == Some("中国");
        Ok(GeocodeInfo {
            // Municipalities have no separate city
            city: text(address.city).or_else(|| province.clone()),
            district: text(address.district),
            province,
            country,
            in_china,
        })
    }
}

#[async_trait]
impl LocationProvider for AMapLocationProvider {
    fn kind(&self) -> LocationProviderKind {
        LocationProviderKind::AMap
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

        let geocode = geocode
            .map_err(|e| tracing::warn!("AMap reverse geocoding failed: {}", e))
            .ok();
        Some(Position {
            coordinate,
            geocode,
        })
    }
}
