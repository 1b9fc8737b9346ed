//! Orchestrator scenarios against an in-memory store.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use nimbus_core::{RequestErrorType, WeatherConfig, WeatherSource};
use nimbus_services::{AcquireError, AcquireOptions, AcquisitionListener, AcquisitionState, UpdateEvent};
use nimbus_weather::source::{GeocodingSearch, OpenMeteoClient};
use nimbus_weather::{
    Coordinate, HttpClient, Location, NominatimClient, RetryConfig, WeatherSourceClient,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sources(fake: &Arc<FakeSource>) -> Vec<Arc<dyn WeatherSourceClient>> {
    vec![fake.clone()]
}

#[tokio::test]
async fn test_current_position_gets_fix_and_weather() {
    let fake = Arc::new(FakeSource::new(WeatherSource::OpenMeteo));
    let h = harness(StubProvider::fixed(), sources(&fake));
    let mut events = h.events.subscribe();

    let current = Location::current_position(WeatherSource::OpenMeteo);
    let updated = h
        .orchestrator
        .acquire(&current, AcquireOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(updated.formatted_id, current.formatted_id);
    assert_eq!(updated.coordinate, Some(Coordinate::new(FIX.0, FIX.1)));
    assert_eq!(updated.geocode.city.as_deref(), Some("北京市"));
    assert!(updated.weather.is_some());

    let stored = h.store.get(&current.formatted_id).await.unwrap().unwrap();
    assert_eq!(stored, updated);
    assert_eq!(*h.recorder.notified.lock(), vec![current.formatted_id.clone()]);
    assert_eq!(*h.recorder.widgets.lock(), vec![current.formatted_id.clone()]);
    assert!(matches!(
        events.recv().await.unwrap(),
        UpdateEvent::LocationUpdated { .. }
    ));
}

#[tokio::test]
async fn test_silent_acquisition_skips_observers() {
    let fake = Arc::new(FakeSource::new(WeatherSource::MetNo));
    let h = harness(StubProvider::fixed(), sources(&fake));

    let berlin = resident("berlin", 52.52, WeatherSource::MetNo);
    h.orchestrator
        .acquire(&berlin, AcquireOptions::default().silent(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(h.recorder.notified.lock().is_empty());
    assert!(h.recorder.widgets.lock().is_empty());
    assert!(h.store.get_weather(&berlin.formatted_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cancel_before_callback_never_fires() {
    let fake = Arc::new(FakeSource::new(WeatherSource::OpenMeteo));
    let h = harness(StubProvider::slow(Duration::from_secs(30)), sources(&fake));
    let listener = Arc::new(CountingListener::default());

    let handle = h.orchestrator.spawn(
        Location::current_position(WeatherSource::OpenMeteo),
        AcquireOptions::default(),
        Some(listener.clone() as Arc<dyn AcquisitionListener>),
    );
    handle.cancel();
    handle.cancel();

    let watch = handle.watch_state();
    let result = handle.join().await;
    assert!(matches!(result, Err(AcquireError::Cancelled)));
    assert_eq!(*watch.borrow(), AcquisitionState::Cancelled);
    assert_eq!(listener.succeeded.load(Ordering::SeqCst), 0);
    assert_eq!(listener.failed.load(Ordering::SeqCst), 0);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_listener_fires_once_per_outcome() {
    let fake = Arc::new(FakeSource::failing(WeatherSource::OpenMeteo));
    let h = harness(StubProvider::fixed(), sources(&fake));
    let listener = Arc::new(CountingListener::default());

    let handle = h.orchestrator.spawn(
        resident("berlin", 52.52, WeatherSource::OpenMeteo),
        AcquireOptions::default(),
        Some(listener.clone() as Arc<dyn AcquisitionListener>),
    );
    let watch = handle.watch_state();
    let result = handle.join().await;

    assert!(matches!(
        result,
        Err(AcquireError::Failed(RequestErrorType::WeatherReqFailed))
    ));
    assert_eq!(*watch.borrow(), AcquisitionState::Failed);
    assert_eq!(listener.failed.load(Ordering::SeqCst), 1);
    assert_eq!(listener.succeeded.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_repeated_acquisitions_keep_identity() {
    let fake = Arc::new(FakeSource::new(WeatherSource::OpenMeteo));
    let h = harness(StubProvider::fixed(), sources(&fake));
    let current = Location::current_position(WeatherSource::OpenMeteo);
    let cancel = CancellationToken::new();

    let first = h.orchestrator.acquire(&current, AcquireOptions::default(), &cancel).await.unwrap();
    let second = h.orchestrator.acquire(&first, AcquireOptions::default(), &cancel).await.unwrap();

    assert_eq!(first.formatted_id, second.formatted_id);
    let list = h.store.list().await.unwrap();
    assert_eq!(list.len(), 1);
    let stored = list[0].weather.as_ref().unwrap();
    assert_eq!(stored.current.temperature, 2.0);
    assert_eq!(Some(stored), second.weather.as_ref());
}

#[tokio::test]
async fn test_failure_keeps_previous_weather() {
    let fake = Arc::new(FakeSource::new(WeatherSource::OpenMeteo));
    let h = harness(StubProvider::fixed(), sources(&fake));
    let berlin = resident("berlin", 52.52, WeatherSource::OpenMeteo);
    let cancel = CancellationToken::new();

    h.orchestrator.acquire(&berlin, AcquireOptions::default(), &cancel).await.unwrap();
    let before = h.store.get_weather(&berlin.formatted_id).await.unwrap();
    assert!(before.is_some());

    fake.fail.store(true, Ordering::SeqCst);
    let result = h.orchestrator.acquire(&berlin, AcquireOptions::default(), &cancel).await;
    assert_eq!(
        result.unwrap_err().request_error(),
        Some(RequestErrorType::WeatherReqFailed)
    );
    assert_eq!(h.store.get_weather(&berlin.formatted_id).await.unwrap(), before);

    let overwrite = AcquireOptions {
        overwrite_on_failure: true,
        ..AcquireOptions::default()
    };
    assert!(h.orchestrator.acquire(&berlin, overwrite, &cancel).await.is_err());
    assert_eq!(h.store.get_weather(&berlin.formatted_id).await.unwrap(), None);
    assert!(h.store.get(&berlin.formatted_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_unconfigured_source_is_api_limit() {
    let fake = Arc::new(FakeSource::new(WeatherSource::OpenMeteo));
    let h = harness(StubProvider::fixed(), sources(&fake));

    let result = h
        .orchestrator
        .acquire(
            &resident("shanghai", 31.23, WeatherSource::CaiYun),
            AcquireOptions::default(),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(
        result.unwrap_err().request_error(),
        Some(RequestErrorType::ApiLimitReached)
    );
}

#[tokio::test]
async fn test_source_without_client_is_weather_failure() {
    let fake = Arc::new(FakeSource::new(WeatherSource::OpenMeteo));
    let h = harness(StubProvider::fixed(), sources(&fake));
    let guangzhou = resident("guangzhou", 23.13, WeatherSource::Cn);
    h.store.put(&guangzhou).await.unwrap();

    let result = h
        .orchestrator
        .acquire(&guangzhou, AcquireOptions::default(), &CancellationToken::new())
        .await;
    assert_eq!(
        result.unwrap_err().request_error(),
        Some(RequestErrorType::WeatherReqFailed)
    );
    assert_eq!(h.store.get(&guangzhou.formatted_id).await.unwrap(), Some(guangzhou));
}

#[tokio::test]
async fn test_keyed_source_geocodes_before_weather() {
    let fake = Arc::new(FakeSource::new(WeatherSource::Accu));
    let h = harness(StubProvider::fixed(), sources(&fake));

    let updated = h
        .orchestrator
        .acquire(
            &Location::current_position(WeatherSource::Accu),
            AcquireOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(updated.city_id, "geocoded-key");
    assert_eq!(updated.weather.unwrap().base.city_id, "geocoded-key");
}

#[tokio::test]
async fn test_converted_weather_reads_back_identical() {
    let server = MockServer::start().await;
    Mock::given(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "utc_offset_seconds": 7200,
            "timezone": "Europe/Berlin",
            "current": {
                "time": 1_714_557_600,
                "temperature_2m": 18.5,
                "relative_humidity_2m": 60,
                "apparent_temperature": 17.9,
                "weather_code": 2,
                "pressure_msl": 1013.2,
                "wind_speed_10m": 11.2,
                "wind_direction_10m": 250,
                "visibility": 18000
            },
            "hourly": {
                "time": [1_714_557_600, 1_714_561_200],
                "temperature_2m": [18.5, 19.1],
                "weather_code": [2, 3],
                "precipitation": [0.0, 0.1]
            },
            "daily": {
                "time": [1_714_514_400, 1_714_600_800],
                "weather_code": [2, 61],
                "temperature_2m_max": [21.0, 17.2],
                "temperature_2m_min": [9.5, 8.1],
                "sunrise": [1_714_533_900, 1_714_620_200],
                "sunset": [1_714_588_200, 1_714_674_700]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(path("/v1/air-quality"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "current": { "time": 1_714_557_600, "european_aqi": 21, "pm2_5": 5.5, "carbon_monoxide": 180.0 }
        })))
        .mount(&server)
        .await;

    let mut config = WeatherConfig::default();
    config.open_meteo.base_url = Some(server.uri());
    config.air_quality_url = server.uri();
    let http = HttpClient::new("nimbus-test", Duration::from_secs(5), RetryConfig::none()).unwrap();
    let client: Arc<dyn WeatherSourceClient> = Arc::new(OpenMeteoClient::new(
        http.clone(),
        &config,
        GeocodingSearch::new(http.clone(), &server.uri()),
        NominatimClient::new(http, server.uri(), "en"),
    ));
    let h = harness(StubProvider::fixed(), vec![client]);

    let berlin = resident("2950159", 52.52, WeatherSource::OpenMeteo);
    let updated = h
        .orchestrator
        .acquire(&berlin, AcquireOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    let weather = updated.weather.clone().unwrap();
    assert_eq!(weather.daily.len(), 2);
    assert_eq!(
        h.store.get_weather(&berlin.formatted_id).await.unwrap(),
        Some(weather)
    );
    assert_eq!(h.store.get(&berlin.formatted_id).await.unwrap(), Some(updated));
}
