use async_trait::async_trait;
use nimbus_core::LocationProviderKind;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{LocationProvider, Permission, Position};
use crate::error::SourceError;
use crate::http::HttpClient;
use crate::types::{Coordinate, GeocodeInfo};

#[derive(Debug, Deserialize)]
struct IpLocationResponse {
    status: i32,
    #[serde(default)]
    message: Option<String>,
    content: Option<IpContent>,
}

#[derive(Debug, Deserialize)]
struct IpContent {
    point: IpPoint,
    address_detail: Option<IpAddressDetail>,
}

/// Baidu sends the point as decimal strings.
#[derive(Debug, Deserialize)]
struct IpPoint {
    x: String,
    y: String,
}

#[derive(Debug, Deserialize)]
struct IpAddressDetail {
    #[serde(default)]
    province: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    district: String,
}

/// IP geolocation through Baidu's `location/ip` API.
pub struct BaiduIpLocationProvider {
    http: HttpClient,
    base_url: String,
    ak: String,
}

impl BaiduIpLocationProvider {
    pub fn new(http: HttpClient, base_url: &str, ak: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            ak: ak.to_string(),
        }
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn locate(&self) -> Result<Position, SourceError> {
        let url = format!("{}/location/ip", self.base_url);
        let body: IpLocationResponse = self
            .http
            .get_json(&url, &[("ak", self.ak.clone()), ("coor", "bd09ll".to_string())])
            .await?;

        if body.status != 0 {
            let message = body.message.unwrap_or_default();
            return Err(match body.status {
                // Key invalid, quota exhausted or IP not whitelisted
                101 | 102 | 200..=299 | 302 => SourceError::ApiLimit(message),
                code => SourceError::Status {
                    status: u16::try_from(code).unwrap_or(0),
                    message: format!("status {}: {}", code, message),
                },
            });
        }

        let content = body
            .content
            .ok_or_else(|| SourceError::EmptyResult("ip location".to_string()))?;
        let parse = |value: &str| {
            value
                .trim()
                .parse::<f64>()
                .map_err(|e| SourceError::Parse(format!("point {:?}: {}", value, e)))
        };
        let coordinate = Coordinate::new(parse(&content.point.y)?, parse(&content.point.x)?);

        let detail = content.address_detail;
        let province = detail
            .as_ref()
            .map(|d| d.province.clone())
            .filter(|p| !p.is_empty());
        // Municipalities come back with an empty city
        let city = detail
            .as_ref()
            .map(|d| d.city.clone())
            .filter(|c| !c.is_empty())
            .or_else(|| province.clone());
        let district = detail.map(|d| d.district).filter(|d| !d.is_empty());

        Ok(Position {
            coordinate,
            geocode: Some(GeocodeInfo {
                country: Some("中国".to_string()),
                province,
                city,
                district,
                in_china: true,
            }),
        })
    }
}

#[async_trait]
impl LocationProvider for BaiduIpLocationProvider {
    fn kind(&self) -> LocationProviderKind {
        LocationProviderKind::BaiduIp
    }

    fn permissions(&self) -> &'static [Permission] {
        &[]
    }

    fn requires_network(&self) -> bool {
        true
    }

    async fn request_location(&self, cancel: &CancellationToken) -> Option<Position> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.locate() => match result {
                Ok(position) => Some(position),
                Err(e) => {
                    tracing::warn!("Baidu IP location failed: {}", e);
                    None
                }
            },
        }
    }
}
