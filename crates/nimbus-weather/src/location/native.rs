use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use nimbus_core::LocationProviderKind;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{LocationProvider, Permission, Position, LOCATION_PERMISSIONS};
use crate::types::Coordinate;

/// One underlying source of fixes (network positioning, GPS, ...).
#[async_trait]
pub trait PositionSignal: Send + Sync {
    fn name(&self) -> &str;

    /// A single fix, or `None` if this signal cannot produce one.
    async fn acquire(&self) -> Option<Coordinate>;
}

/// Races every signal and takes the first fix.
///
/// The race is bounded by `timeout`; when it expires, or every signal fails,
/// the last known coordinate is returned instead.
pub struct NativeLocationProvider {
    signals: Vec<Arc<dyn PositionSignal>>,
    timeout: Duration,
    last_known: Mutex<Option<Coordinate>>,
}

impl NativeLocationProvider {
    pub fn new(signals: Vec<Arc<dyn PositionSignal>>, timeout: Duration) -> Self {
        Self {
            signals,
            timeout,
            last_known: Mutex::new(None),
        }
    }

    /// Seed the cache, e.g. with the coordinate stored for the current position.
    pub fn with_last_known(self, coordinate: Coordinate) -> Self {
        *self.last_known.lock() = Some(coordinate);
        self
    }

    pub fn last_known(&self) -> Option<Coordinate> {
        *self.last_known.lock()
    }

    /// Run the signal race. Shared with the vendor providers that enrich a
    /// native fix with their own geocoding.
    pub async fn fix(&self, cancel: &CancellationToken) -> Option<Coordinate> {
        if self.signals.is_empty() {
            tracing::debug!("No position signals, using last known coordinate");
            return self.last_known();
        }

        let race = async {
            let mut pending: FuturesUnordered<_> = self
                .signals
                .iter()
                .map(|signal| async move { (signal.name(), signal.acquire().await) })
                .collect();

            while let Some((name, result)) = pending.next().await {
                match result {
                    Some(coordinate) if coordinate.is_valid() => {
                        tracing::debug!("Signal {} won the race: {}", name, coordinate);
                        return Some(coordinate);
                    }
                    Some(coordinate) => {
                        tracing::warn!("Signal {} produced invalid coordinate {:?}", name, coordinate);
                    }
                    None => tracing::debug!("Signal {} produced no fix", name),
                }
            }
            None
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = tokio::time::timeout(self.timeout, race) => result,
        };

        match result {
            Ok(Some(coordinate)) => {
                *self.last_known.lock() = Some(coordinate);
                Some(coordinate)
            }
            Ok(None) => {
                tracing::warn!("All position signals failed, falling back to last known");
                self.last_known()
            }
            Err(_) => {
                tracing::warn!("Position timed out after {:?}, falling back to last known", self.timeout);
                self.last_known()
            }
        }
    }
}

#[async_trait]
impl LocationProvider for NativeLocationProvider {
    fn kind(&self) -> LocationProviderKind {
        LocationProviderKind::Native
    }

    fn permissions(&self) -> &'static [Permission] {
        LOCATION_PERMISSIONS
    }

    fn requires_network(&self) -> bool {
        false
    }

    async fn request_location(&self, cancel: &CancellationToken) -> Option<Position> {
        self.fix(cancel).await.map(Position::new)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Signal that answers after a delay, or never.
    pub struct FakeSignal {
        pub name: &'static str,
        pub delay: Duration,
        pub result: Option<Coordinate>,
    }

    impl FakeSignal {
        pub fn arc(name: &'static str, delay_ms: u64, result: Option<Coordinate>) -> Arc<dyn PositionSignal> {
            Arc::new(Self {
                name,
                delay: Duration::from_millis(delay_ms),
                result,
            })
        }

        pub fn hanging(name: &'static str) -> Arc<dyn PositionSignal> {
            Self::arc(name, 60_000, None)
        }
    }

    #[async_trait]
    impl PositionSignal for FakeSignal {
        fn name(&self) -> &str {
            self.name
        }

        async fn acquire(&self) -> Option<Coordinate> {
            tokio::time::sleep(self.delay).await;
            self.result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeSignal;
    use super::*;

    const NETWORK_FIX: Coordinate = Coordinate {
        latitude: 47.60,
        longitude: -122.33,
    };
    const GPS_FIX: Coordinate = Coordinate {
        latitude: 47.6062,
        longitude: -122.3321,
    };

    #[tokio::test]
    async fn test_first_signal_wins() {
        let provider = NativeLocationProvider::new(
            vec![
                FakeSignal::arc("network", 10, Some(NETWORK_FIX)),
                FakeSignal::arc("gps", 500, Some(GPS_FIX)),
            ],
            Duration::from_secs(2),
        );
        let fix = provider.fix(&CancellationToken::new()).await;
        assert_eq!(fix, Some(NETWORK_FIX));
        assert_eq!(provider.last_known(), Some(NETWORK_FIX));
    }

    #[tokio::test]
    async fn test_failed_signal_does_not_end_race() {
        let provider = NativeLocationProvider::new(
            vec![
                FakeSignal::arc("network", 1, None),
                FakeSignal::arc("gps", 20, Some(GPS_FIX)),
            ],
            Duration::from_secs(2),
        );
        assert_eq!(provider.fix(&CancellationToken::new()).await, Some(GPS_FIX));
    }

    #[tokio::test]
    async fn test_timeout_without_cache_is_none() {
        let provider = NativeLocationProvider::new(
            vec![FakeSignal::hanging("network"), FakeSignal::hanging("gps")],
            Duration::from_millis(50),
        );
        let position = provider.request_location(&CancellationToken::new()).await;
        assert_eq!(position, None);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_last_known() {
        let provider = NativeLocationProvider::new(
            vec![FakeSignal::hanging("network")],
            Duration::from_millis(50),
        )
        .with_last_known(GPS_FIX);
        let position = provider.request_location(&CancellationToken::new()).await;
        assert_eq!(position.map(|p| p.coordinate), Some(GPS_FIX));
    }

    #[tokio::test]
    async fn test_cancel_returns_immediately() {
        let provider = NativeLocationProvider::new(
            vec![FakeSignal::hanging("network")],
            Duration::from_secs(30),
        )
        .with_last_known(GPS_FIX);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = std::time::Instant::now();
        assert_eq!(provider.request_location(&cancel).await, None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
