use std::sync::Arc;
use std::time::Duration;

use nimbus_core::RequestErrorType;
use tokio_util::sync::CancellationToken;

use super::{LocationProvider, Permission, Platform};
use crate::types::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{0}")]
    Failed(RequestErrorType),
    #[error("location request cancelled")]
    Cancelled,
}

/// Location Resolution Coordinator.
///
/// Checks preconditions, then races the configured provider against an
/// overall timeout and the caller's cancellation token.
pub struct LocationResolver {
    provider: Arc<dyn LocationProvider>,
    platform: Arc<dyn Platform>,
    timeout: Duration,
}

impl LocationResolver {
    pub fn new(provider: Arc<dyn LocationProvider>, platform: Arc<dyn Platform>, timeout: Duration) -> Self {
        Self {
            provider,
            platform,
            timeout,
        }
    }

    pub fn provider(&self) -> &Arc<dyn LocationProvider> {
        &self.provider
    }

    /// Network, then foreground permissions, then background permission.
    pub async fn check_preconditions(&self, background: bool) -> Result<(), RequestErrorType> {
        if self.provider.requires_network() && !self.platform.is_network_available().await {
            return Err(RequestErrorType::NetworkUnavailable);
        }

        let permissions = self.provider.permissions();
        if let Some(missing) = permissions
            .iter()
            .find(|p| !self.platform.has_permission(**p))
        {
            tracing::debug!("Missing permission {:?}", missing);
            return Err(RequestErrorType::AccessLocationPermissionMissing);
        }

        if background
            && !permissions.is_empty()
            && !self.platform.has_permission(Permission::AccessBackgroundLocation)
        {
            return Err(RequestErrorType::AccessBackgroundLocationPermissionMissing);
        }

        Ok(())
    }

    /// Resolve the position for `previous`.
    ///
    /// Resident locations are returned unchanged. For the current position the
    /// identity is kept and the coordinate replaced with the new fix.
    #[tracing::instrument(skip_all, fields(id = %previous.formatted_id, background = background))]
    pub async fn resolve(
        &self,
        previous: &Location,
        background: bool,
        cancel: &CancellationToken,
    ) -> Result<Location, ResolveError> {
        if !previous.is_current_position {
            return Ok(previous.clone());
        }
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        self.check_preconditions(background)
            .await
            .map_err(ResolveError::Failed)?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.provider.request_location(cancel)) => outcome,
        };

        match outcome {
            Ok(Some(position)) => {
                let mut location = previous.clone();
                location.apply_fix(position.coordinate, position.geocode);
                tracing::info!("Resolved position {}", position.coordinate);
                Ok(location)
            }
            Ok(None) if cancel.is_cancelled() => Err(ResolveError::Cancelled),
            Ok(None) => {
                tracing::warn!("{} provider returned no position", self.provider.kind());
                Err(ResolveError::Failed(RequestErrorType::LocationFailed))
            }
            Err(_) => {
                tracing::warn!("Location acquisition timed out after {:?}", self.timeout);
                Err(ResolveError::Failed(RequestErrorType::LocationFailed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::location::native::test_support::FakeSignal;
    use crate::location::{
        DesktopPlatform, NativeLocationProvider, Position, LOCATION_PERMISSIONS,
    };
    use crate::types::{Coordinate, GeocodeInfo};
    use async_trait::async_trait;
    use nimbus_core::{LocationProviderKind, WeatherSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        permissions: &'static [Permission],
        delay: Duration,
        result: Option<Position>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(result: Option<Position>) -> Self {
            Self {
                permissions: LOCATION_PERMISSIONS,
                delay: Duration::ZERO,
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LocationProvider for StubProvider {
        fn kind(&self) -> LocationProviderKind {
            LocationProviderKind::Native
        }

        fn permissions(&self) -> &'static [Permission] {
            self.permissions
        }

        fn requires_network(&self) -> bool {
            true
        }

        async fn request_location(&self, _cancel: &CancellationToken) -> Option<Position> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    struct Offline;

    #[async_trait]
    impl Platform for Offline {
        fn has_permission(&self, _permission: Permission) -> bool {
            true
        }

        async fn is_network_available(&self) -> bool {
            false
        }
    }

    fn online() -> Arc<dyn Platform> {
        Arc::new(DesktopPlatform::new().with_check_host("127.0.0.1:80"))
    }

    fn fix() -> Position {
        Position {
            coordinate: Coordinate::new(39.93, 116.40),
            geocode: Some(GeocodeInfo {
                city: Some("北京市".into()),
                in_china: true,
                ..Default::default()
            }),
        }
    }

    fn current() -> Location {
        Location::current_position(WeatherSource::OpenMeteo)
    }

    #[tokio::test]
    async fn test_success_keeps_identity() {
        let resolver = LocationResolver::new(Arc::new(StubProvider::new(Some(fix()))), online(), Duration::from_secs(5));
        let location = resolver.resolve(&current(), false, &CancellationToken::new()).await.unwrap();
        assert_eq!(location.formatted_id, current().formatted_id);
        assert_eq!(location.coordinate, Some(Coordinate::new(39.93, 116.40)));
        assert!(location.geocode.in_china);
    }

    #[tokio::test]
    async fn test_resident_passes_through() {
        let provider = Arc::new(StubProvider::new(Some(fix())));
        let resolver = LocationResolver::new(provider.clone(), online(), Duration::from_secs(5));
        let resident = Location::resident("x", Coordinate::new(1.0, 2.0), "UTC", GeocodeInfo::default(), WeatherSource::MetNo);
        let resolved = resolver.resolve(&resident, true, &CancellationToken::new()).await.unwrap();
        assert_eq!(resolved, resident);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_offline_short_circuits() {
        let provider = Arc::new(StubProvider::new(Some(fix())));
        let resolver = LocationResolver::new(provider.clone(), Arc::new(Offline), Duration::from_secs(5));
        let result = resolver.resolve(&current(), false, &CancellationToken::new()).await;
        assert_eq!(result, Err(ResolveError::Failed(RequestErrorType::NetworkUnavailable)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_foreground_permission() {
        let platform = DesktopPlatform::new()
            .with_check_host("127.0.0.1:80")
            .with_permissions([Permission::AccessCoarseLocation]);
        let resolver = LocationResolver::new(Arc::new(StubProvider::new(Some(fix()))), Arc::new(platform), Duration::from_secs(5));
        let result = resolver.resolve(&current(), false, &CancellationToken::new()).await;
        assert_eq!(
            result,
            Err(ResolveError::Failed(RequestErrorType::AccessLocationPermissionMissing))
        );
    }

    #[tokio::test]
    async fn test_background_permission_only_checked_in_background() {
        let platform = Arc::new(
            DesktopPlatform::new()
                .with_check_host("127.0.0.1:80")
                .with_permissions(LOCATION_PERMISSIONS.iter().copied()),
        );
        let resolver = LocationResolver::new(Arc::new(StubProvider::new(Some(fix()))), platform.clone(), Duration::from_secs(5));

        assert!(resolver.resolve(&current(), false, &CancellationToken::new()).await.is_ok());
        assert_eq!(
            resolver.resolve(&current(), true, &CancellationToken::new()).await,
            Err(ResolveError::Failed(RequestErrorType::AccessBackgroundLocationPermissionMissing))
        );

        // Providers without permissions (IP-based) skip the background check
        let ip_like = StubProvider {
            permissions: &[],
            ..StubProvider::new(Some(fix()))
        };
        let resolver = LocationResolver::new(Arc::new(ip_like), platform, Duration::from_secs(5));
        assert!(resolver.resolve(&current(), true, &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_overall_timeout_is_location_failed() {
        let slow = StubProvider {
            delay: Duration::from_secs(30),
            ..StubProvider::new(Some(fix()))
        };
        let resolver = LocationResolver::new(Arc::new(slow), online(), Duration::from_millis(50));
        let result = resolver.resolve(&current(), false, &CancellationToken::new()).await;
        assert_eq!(result, Err(ResolveError::Failed(RequestErrorType::LocationFailed)));
    }

    #[tokio::test]
    async fn test_all_signals_time_out_without_cache() {
        let native = NativeLocationProvider::new(
            vec![FakeSignal::hanging("network"), FakeSignal::hanging("gps")],
            Duration::from_millis(50),
        );
        let resolver = LocationResolver::new(Arc::new(native), online(), Duration::from_secs(5));
        let result = resolver.resolve(&current(), false, &CancellationToken::new()).await;
        assert_eq!(result, Err(ResolveError::Failed(RequestErrorType::LocationFailed)));
    }

    #[tokio::test]
    async fn test_cancel_during_request() {
        let slow = StubProvider {
            delay: Duration::from_secs(30),
            ..StubProvider::new(Some(fix()))
        };
        let resolver = LocationResolver::new(Arc::new(slow), online(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = resolver.resolve(&current(), false, &cancel).await;
        assert_eq!(result, Err(ResolveError::Cancelled));
    }
}
