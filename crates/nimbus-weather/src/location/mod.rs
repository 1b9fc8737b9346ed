//! Location providers and the resolution coordinator.
//!
//! A [`LocationProvider`] turns "where is the device?" into a single
//! best-effort [`Position`]. Providers never fail across the async boundary:
//! every problem (timeout, HTTP error, missing data, cancellation) is `None`.
//! The [`LocationResolver`] adds the preconditions and the overall timeout.

mod amap;
mod baidu;
mod baidu_ip;
#[cfg(target_os = "linux")]
mod geoclue;
mod native;
mod platform;
mod resolver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nimbus_core::{LocationConfig, LocationProviderKind};
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::http::HttpClient;
use crate::types::{Coordinate, GeocodeInfo};

pub use amap::AMapLocationProvider;
pub use baidu::BaiduLocationProvider;
pub use baidu_ip::BaiduIpLocationProvider;
#[cfg(target_os = "linux")]
pub use geoclue::{AccuracyLevel, GeoClueSignal};
pub use native::{NativeLocationProvider, PositionSignal};
pub use platform::{DesktopPlatform, Platform};
pub use resolver::{LocationResolver, ResolveError};

/// OS permissions a provider needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    AccessCoarseLocation,
    AccessFineLocation,
    AccessBackgroundLocation,
}

/// Foreground permissions of every fix-based provider.
pub const LOCATION_PERMISSIONS: &[Permission] =
    &[Permission::AccessCoarseLocation, Permission::AccessFineLocation];

/// Result of one provider request.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub coordinate: Coordinate,
    pub geocode: Option<GeocodeInfo>,
}

impl Position {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            geocode: None,
        }
    }
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn kind(&self) -> LocationProviderKind;

    /// Empty for IP-based providers.
    fn permissions(&self) -> &'static [Permission];

    fn requires_network(&self) -> bool;

    /// Resolve one position. Returns `None` on any failure, and immediately
    /// once `cancel` fires.
    async fn request_location(&self, cancel: &CancellationToken) -> Option<Position>;
}

/// Position signals available on this platform.
#[cfg(target_os = "linux")]
pub fn platform_signals(config: &LocationConfig) -> Vec<Arc<dyn PositionSignal>> {
    let mut signals: Vec<Arc<dyn PositionSignal>> =
        vec![Arc::new(GeoClueSignal::new(AccuracyLevel::City))];
    if config.use_gps {
        signals.push(Arc::new(GeoClueSignal::new(AccuracyLevel::Exact)));
    }
    signals
}

/// Position signals available on this platform.
#[cfg(not(target_os = "linux"))]
pub fn platform_signals(_config: &LocationConfig) -> Vec<Arc<dyn PositionSignal>> {
    tracing::warn!("No native positioning backend on this platform");
    Vec::new()
}

/// Build the configured provider on top of the given native signals.
///
/// `last_known` seeds the fallback used when every signal times out,
/// typically the coordinate stored for the current position.
pub fn create_provider(
    config: &LocationConfig,
    http: HttpClient,
    signals: Vec<Arc<dyn PositionSignal>>,
    last_known: Option<Coordinate>,
) -> Result<Arc<dyn LocationProvider>, SourceError> {
    let timeout = Duration::from_secs(config.provider_timeout_secs);
    let native = || {
        let provider = NativeLocationProvider::new(signals.clone(), timeout);
        match last_known {
            Some(coordinate) => provider.with_last_known(coordinate),
            None => provider,
        }
    };

    let provider: Arc<dyn LocationProvider> = match config.provider {
        LocationProviderKind::Native => Arc::new(native()),
        LocationProviderKind::Baidu => Arc::new(BaiduLocationProvider::new(
            native(),
            http,
            &config.baidu_base_url,
            required_key(config.baidu_ak.as_deref(), "location.baidu_ak")?,
        )),
        LocationProviderKind::BaiduIp => Arc::new(BaiduIpLocationProvider::new(
            http,
            &config.baidu_base_url,
            required_key(config.baidu_ak.as_deref(), "location.baidu_ak")?,
        )),
        LocationProviderKind::AMap => Arc::new(AMapLocationProvider::new(
            native(),
            http,
            &config.amap_base_url,
            required_key(config.amap_key.as_deref(), "location.amap_key")?,
        )),
    };

    tracing::info!("Location provider: {}", config.provider);
    Ok(provider)
}

fn required_key<'a>(key: Option<&'a str>, field: &str) -> Result<&'a str, SourceError> {
    key.filter(|k| !k.is_empty())
        .ok_or_else(|| SourceError::MissingCredential(field.to_string()))
}
