//! Shared fixtures: scripted provider, source and observers.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use nimbus_core::{LocationProviderKind, WeatherSource};
use nimbus_services::{
    AcquireError, AcquisitionListener, EventBus, Notifier, Orchestrator, WidgetUpdater,
};
use nimbus_store::LocationStore;
use nimbus_weather::{
    Coordinate, CurrentWeather, GeocodeInfo, Location, LocationProvider, LocationResolver,
    Permission, Platform, Position, SourceError, SourceRegistry, Weather, WeatherBase,
    WeatherCondition, WeatherSourceClient, Wind,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const FIX: (f64, f64) = (39.93, 116.40);

/// Provider answering with a fixed position after a delay.
pub struct StubProvider {
    pub delay: Duration,
    pub position: Option<Position>,
}

impl StubProvider {
    pub fn fixed() -> Self {
        Self {
            delay: Duration::ZERO,
            position: Some(Position {
                coordinate: Coordinate::new(FIX.0, FIX.1),
                geocode: Some(GeocodeInfo {
                    country: Some("中国".into()),
                    city: Some("北京市".into()),
                    in_china: true,
                    ..Default::default()
                }),
            }),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::fixed()
        }
    }
}

#[async_trait]
impl LocationProvider for StubProvider {
    fn kind(&self) -> LocationProviderKind {
        LocationProviderKind::Native
    }

    fn permissions(&self) -> &'static [Permission] {
        &[]
    }

    fn requires_network(&self) -> bool {
        false
    }

    async fn request_location(&self, cancel: &CancellationToken) -> Option<Position> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(self.delay) => self.position.clone(),
        }
    }
}

pub struct Granted;

#[async_trait]
impl Platform for Granted {
    fn has_permission(&self, _permission: Permission) -> bool {
        true
    }

    async fn is_network_available(&self) -> bool {
        true
    }
}

pub fn weather(city_id: &str, temperature: f64) -> Weather {
    let publish = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
    Weather {
        base: WeatherBase {
            city_id: city_id.to_string(),
            publish_time: publish,
            update_time: publish,
        },
        current: CurrentWeather {
            condition: WeatherCondition::Clear,
            text: None,
            temperature,
            feels_like: None,
            humidity: Some(50.0),
            wind: Wind::default(),
            pressure: None,
            visibility: None,
            dew_point: None,
            cloud_cover: None,
            uv_index: None,
            air_quality: None,
        },
        hourly: Vec::new(),
        daily: Vec::new(),
        alerts: Vec::new(),
    }
}

/// Source whose n-th weather request reports a temperature of n °C.
pub struct FakeSource {
    pub source: WeatherSource,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Duration,
    pub gate: Option<Arc<Notify>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub requested: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(source: WeatherSource) -> Self {
        Self {
            source,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: Duration::ZERO,
            gate: None,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(source: WeatherSource) -> Self {
        let fake = Self::new(source);
        fake.fail.store(true, Ordering::SeqCst);
        fake
    }
}

#[async_trait]
impl WeatherSourceClient for FakeSource {
    fn source(&self) -> WeatherSource {
        self.source
    }

    async fn search(&self, _query: &str) -> Result<Vec<Location>, SourceError> {
        Ok(Vec::new())
    }

    async fn reverse_geocode(&self, location: &Location) -> Result<Location, SourceError> {
        let mut resolved = location.clone();
        if self.source.needs_geocode() {
            resolved.city_id = "geocoded-key".to_string();
        }
        Ok(resolved)
    }

    async fn request_weather(&self, location: &Location) -> Result<Weather, SourceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requested.lock().push(location.formatted_id.clone());

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Status {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(weather(&location.city_id, n as f64))
    }
}

/// Records observer calls by formatted id.
#[derive(Default)]
pub struct Recorder {
    pub notified: Mutex<Vec<String>>,
    pub widgets: Mutex<Vec<String>>,
    pub widget_lists: Mutex<Vec<Vec<String>>>,
}

impl Notifier for Recorder {
    fn update_if_necessary(&self, location: &Location) {
        self.notified.lock().push(location.formatted_id.clone());
    }
}

impl WidgetUpdater for Recorder {
    fn update_location(&self, location: &Location) {
        self.widgets.lock().push(location.formatted_id.clone());
    }

    fn update_locations(&self, locations: &[Location]) {
        self.widget_lists
            .lock()
            .push(locations.iter().map(|l| l.formatted_id.clone()).collect());
    }
}

#[derive(Default)]
pub struct CountingListener {
    pub succeeded: AtomicUsize,
    pub failed: AtomicUsize,
}

impl AcquisitionListener for CountingListener {
    fn on_succeeded(&self, _location: &Location) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failed(&self, _location: &Location, _error: &AcquireError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: LocationStore,
    pub recorder: Arc<Recorder>,
    pub events: EventBus,
}

pub fn harness(provider: StubProvider, clients: Vec<Arc<dyn WeatherSourceClient>>) -> Harness {
    let mut sources = SourceRegistry::new();
    for client in clients {
        sources.register(client);
    }
    let resolver = Arc::new(LocationResolver::new(
        Arc::new(provider),
        Arc::new(Granted),
        Duration::from_secs(5),
    ));
    let store = LocationStore::in_memory().unwrap();
    let recorder = Arc::new(Recorder::default());
    let events = EventBus::new();
    let orchestrator = Arc::new(Orchestrator::new(
        resolver,
        sources,
        store.clone(),
        recorder.clone(),
        recorder.clone(),
        events.clone(),
    ));

    Harness {
        orchestrator,
        store,
        recorder,
        events,
    }
}

pub fn resident(name: &str, latitude: f64, source: WeatherSource) -> Location {
    Location::resident(
        name,
        Coordinate::new(latitude, 13.4),
        "UTC",
        GeocodeInfo {
            city: Some(name.to_string()),
            ..Default::default()
        },
        source,
    )
}
