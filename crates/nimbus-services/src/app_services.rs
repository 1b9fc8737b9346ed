//! Application services context.
//!
//! Everything the app shares (store, sources, orchestrator, scheduler and
//! event bus) is built once from a [`Config`] and handed around explicitly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use nimbus_core::{AppError, Config, WeatherSource};
use nimbus_store::LocationStore;
use nimbus_weather::{
    create_provider, platform_signals, Coordinate, DesktopPlatform, HttpClient, Location,
    LocationResolver, Platform, SourceRegistry,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::observers::{EventBus, Notifier, TracingObserver, WidgetUpdater};
use crate::orchestrator::Orchestrator;
use crate::polling::PollingScheduler;

pub struct AppServices {
    config: Config,
    store: LocationStore,
    sources: SourceRegistry,
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<PollingScheduler>,
    events: EventBus,
    /// Cancelled on shutdown; every long-running task watches a child of it
    shutdown: CancellationToken,
}

impl AppServices {
    /// Desktop services that log instead of notifying.
    pub async fn new(config: Config) -> Result<Self> {
        let observer = Arc::new(TracingObserver);
        Self::with_observers(config, observer.clone(), observer).await
    }

    pub async fn with_observers(
        config: Config,
        notifier: Arc<dyn Notifier>,
        widgets: Arc<dyn WidgetUpdater>,
    ) -> Result<Self> {
        let store = LocationStore::open(&config.store_path()).context("Failed to open location store")?;
        Self::build(config, store, Arc::new(DesktopPlatform::new()), notifier, widgets).await
    }

    /// Assemble the services on a given store and platform.
    pub async fn build(
        config: Config,
        store: LocationStore,
        platform: Arc<dyn Platform>,
        notifier: Arc<dyn Notifier>,
        widgets: Arc<dyn WidgetUpdater>,
    ) -> Result<Self> {
        let http = HttpClient::from_config(&config.weather).context("Failed to build HTTP client")?;
        let provider = create_provider(
            &config.location,
            http.clone(),
            platform_signals(&config.location),
            stored_fix(&store).await,
        )
        .context("Failed to create location provider")?;
        let resolver = Arc::new(LocationResolver::new(
            provider,
            platform,
            Duration::from_secs(config.location.acquisition_timeout_secs),
        ));
        let sources = SourceRegistry::from_config(&config.weather, http);

        let events = EventBus::new();
        let orchestrator = Arc::new(Orchestrator::new(
            resolver,
            sources.clone(),
            store.clone(),
            notifier,
            widgets.clone(),
            events.clone(),
        ));
        let scheduler = Arc::new(PollingScheduler::new(
            orchestrator.clone(),
            widgets,
            events.clone(),
            config.polling.clone(),
        ));

        tracing::info!(
            "Services ready: provider {}, sources {:?}",
            config.location.provider,
            sources.sources()
        );

        Ok(Self {
            config,
            store,
            sources,
            orchestrator,
            scheduler,
            events,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LocationStore {
        &self.store
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Arc<PollingScheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Token for work that should stop on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Make sure the list starts with the current-position record, creating
    /// it on the default source. Returns the full list.
    pub async fn ensure_current_position(&self) -> Result<Vec<Location>, AppError> {
        let mut locations = self.store.list().await?;
        if locations.first().is_some_and(|l| l.is_current_position) {
            return Ok(locations);
        }

        let current = match locations.iter().position(|l| l.is_current_position) {
            Some(index) => locations.remove(index),
            None => Location::current_position(self.config.weather.default_source),
        };
        locations.insert(0, current);
        self.store.write_list(&locations).await?;
        Ok(locations)
    }

    /// Geocoding search on `source`, or the configured default.
    pub async fn search(
        &self,
        query: &str,
        source: Option<WeatherSource>,
    ) -> Result<Vec<Location>, AppError> {
        let source = source.unwrap_or(self.config.weather.default_source);
        let client = self.sources.get(source)?;
        Ok(client.search(query).await?)
    }

    /// Run the polling loop until shutdown.
    pub fn spawn_polling(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let cancel = self.shutdown_token();
        tokio::spawn(async move { scheduler.run(cancel).await })
    }

    pub fn shutdown(&self) {
        tracing::info!("AppServices shutdown initiated");
        self.scheduler.stop();
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Coordinate last resolved for the current position, if any.
async fn stored_fix(store: &LocationStore) -> Option<Coordinate> {
    match store.list().await {
        Ok(locations) => locations
            .into_iter()
            .find(|l| l.is_current_position)
            .and_then(|l| l.coordinate),
        Err(e) => {
            tracing::warn!("Could not read stored position: {}", e);
            None
        }
    }
}
