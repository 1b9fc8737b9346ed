//! Acquisition Orchestrator.
//!
//! One acquisition resolves a location, fetches its weather, persists both
//! and tells the observers. Each stage is awaited in order under a single
//! cancellation token; the progress is published on a `watch` channel.

use std::sync::Arc;

use nimbus_core::{AppError, RequestErrorType};
use nimbus_store::{LocationStore, StoreError};
use nimbus_weather::{Location, LocationResolver, ResolveError, SourceRegistry, Stage};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::observers::{EventBus, Notifier, UpdateEvent, WidgetUpdater};

/// Progress of one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    ResolvingLocation,
    FetchingWeather,
    Succeeded,
    Failed,
    Cancelled,
}

impl AcquisitionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Requested without the user looking; needs background location access
    pub background: bool,
    /// Call the notifier and widget updater on success
    pub notify: bool,
    /// On failure, persist the location as resolved so far and drop its stale
    /// weather
    pub overwrite_on_failure: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            background: false,
            notify: true,
            overwrite_on_failure: false,
        }
    }
}

impl AcquireOptions {
    pub fn background() -> Self {
        Self {
            background: true,
            ..Self::default()
        }
    }

    pub fn silent(self) -> Self {
        Self {
            notify: false,
            ..self
        }
    }
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("{0}")]
    Failed(RequestErrorType),

    #[error("acquisition cancelled")]
    Cancelled,

    #[error("failed to persist {id}: {source}")]
    Persistence {
        id: String,
        #[source]
        source: StoreError,
    },
}

impl AcquireError {
    /// The failure kind to show the user, if this is a request failure.
    pub fn request_error(&self) -> Option<RequestErrorType> {
        match self {
            Self::Failed(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl From<AcquireError> for AppError {
    fn from(e: AcquireError) -> Self {
        match e {
            AcquireError::Failed(kind) => AppError::Request(kind),
            AcquireError::Cancelled => AppError::Cancelled,
            AcquireError::Persistence { source, .. } => source.into(),
        }
    }
}

impl From<ResolveError> for AcquireError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Failed(kind) => Self::Failed(kind),
            ResolveError::Cancelled => Self::Cancelled,
        }
    }
}

/// Completion callbacks of a spawned acquisition.
pub trait AcquisitionListener: Send + Sync {
    fn on_succeeded(&self, location: &Location);

    /// `location` is the location as it was requested.
    fn on_failed(&self, location: &Location, error: &AcquireError);
}

pub struct Orchestrator {
    resolver: Arc<LocationResolver>,
    sources: SourceRegistry,
    store: LocationStore,
    notifier: Arc<dyn Notifier>,
    widgets: Arc<dyn WidgetUpdater>,
    events: EventBus,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<LocationResolver>,
        sources: SourceRegistry,
        store: LocationStore,
        notifier: Arc<dyn Notifier>,
        widgets: Arc<dyn WidgetUpdater>,
        events: EventBus,
    ) -> Self {
        Self {
            resolver,
            sources,
            store,
            notifier,
            widgets,
            events,
        }
    }

    pub fn store(&self) -> &LocationStore {
        &self.store
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Refresh `location` and return it with coordinate, names and weather
    /// updated. The stored copy is replaced on success only, unless
    /// `options.overwrite_on_failure` is set.
    pub async fn acquire(
        &self,
        location: &Location,
        options: AcquireOptions,
        cancel: &CancellationToken,
    ) -> Result<Location, AcquireError> {
        let (state, _) = watch::channel(AcquisitionState::Idle);
        self.run(location, options, cancel, &state).await
    }

    /// Start an acquisition in the background.
    ///
    /// The listener fires at most once, and never after
    /// [`AcquisitionHandle::cancel`] has returned.
    pub fn spawn(
        self: &Arc<Self>,
        location: Location,
        options: AcquireOptions,
        listener: Option<Arc<dyn AcquisitionListener>>,
    ) -> AcquisitionHandle {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(AcquisitionState::Idle);
        let slot = Arc::new(Mutex::new(listener));

        let task = tokio::spawn({
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            let slot = Arc::clone(&slot);
            async move {
                let result = this.run(&location, options, &cancel, &state_tx).await;

                // Held while calling back so cancel() waits for us
                let mut guard = slot.lock();
                if let Some(listener) = guard.take() {
                    match &result {
                        Ok(updated) => listener.on_succeeded(updated),
                        Err(AcquireError::Cancelled) => {}
                        Err(e) => listener.on_failed(&location, e),
                    }
                }
                drop(guard);
                result
            }
        });

        AcquisitionHandle {
            cancel,
            listener: slot,
            state: state_rx,
            task,
        }
    }

    #[tracing::instrument(skip_all, fields(id = %location.formatted_id, source = %location.weather_source))]
    async fn run(
        &self,
        location: &Location,
        options: AcquireOptions,
        cancel: &CancellationToken,
        state: &watch::Sender<AcquisitionState>,
    ) -> Result<Location, AcquireError> {
        let mut working = location.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
            outcome = self.resolve_and_fetch(&mut working, options, cancel, state) => outcome,
        };

        let result = match outcome {
            Ok(()) => self.persist(working).await,
            Err(e) => {
                if options.overwrite_on_failure && !matches!(e, AcquireError::Cancelled) {
                    self.overwrite(&working).await;
                }
                Err(e)
            }
        };

        match &result {
            Ok(updated) => {
                state.send_replace(AcquisitionState::Succeeded);
                tracing::info!("Weather updated for {}", updated.display_name());
                if options.notify {
                    self.notifier.update_if_necessary(updated);
                    self.widgets.update_location(updated);
                }
                self.events.emit(UpdateEvent::LocationUpdated {
                    location: Box::new(updated.clone()),
                });
            }
            Err(AcquireError::Cancelled) => {
                state.send_replace(AcquisitionState::Cancelled);
                tracing::debug!("Acquisition cancelled");
            }
            Err(e) => {
                state.send_replace(AcquisitionState::Failed);
                tracing::warn!("Acquisition failed: {}", e);
                self.events.emit(UpdateEvent::LocationFailed {
                    formatted_id: location.formatted_id.clone(),
                    error: e.request_error(),
                });
            }
        }
        result
    }

    async fn resolve_and_fetch(
        &self,
        working: &mut Location,
        options: AcquireOptions,
        cancel: &CancellationToken,
        state: &watch::Sender<AcquisitionState>,
    ) -> Result<(), AcquireError> {
        state.send_replace(AcquisitionState::ResolvingLocation);
        let source = working.weather_source;
        let client = self
            .sources
            .get(source)
            .map_err(|e| AcquireError::Failed(e.classify(Stage::Weather)))?;

        if working.is_current_position {
            *working = self.resolver.resolve(working, options.background, cancel).await?;
        }

        if working.is_current_position || (source.needs_geocode() && working.city_id.is_empty()) {
            match client.reverse_geocode(working).await {
                Ok(resolved) => *working = resolved,
                Err(e) if source.needs_geocode() => {
                    tracing::warn!("Reverse geocoding failed: {}", e);
                    return Err(AcquireError::Failed(e.classify(Stage::Geocode)));
                }
                Err(e) => tracing::debug!("Reverse geocoding failed, using coordinate: {}", e),
            }
        }

        if !working.is_usable() {
            return Err(AcquireError::Failed(RequestErrorType::LocationFailed));
        }

        state.send_replace(AcquisitionState::FetchingWeather);
        let weather = client.request_weather(working).await.map_err(|e| {
            tracing::warn!("Weather request failed: {}", e);
            AcquireError::Failed(e.classify(Stage::Weather))
        })?;
        working.weather = Some(weather);
        Ok(())
    }

    async fn persist(&self, location: Location) -> Result<Location, AcquireError> {
        match self.store.put(&location).await {
            Ok(()) => Ok(location),
            Err(source) => Err(AcquireError::Persistence {
                id: location.formatted_id,
                source,
            }),
        }
    }

    async fn overwrite(&self, partial: &Location) {
        let mut record = partial.clone();
        record.weather = None;
        let stored = match self.store.put(&record).await {
            Ok(()) => self.store.delete_weather(&record.formatted_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            tracing::error!("Failed to overwrite {}: {}", record.formatted_id, e);
        }
    }
}

/// A running acquisition started by [`Orchestrator::spawn`].
pub struct AcquisitionHandle {
    cancel: CancellationToken,
    listener: Arc<Mutex<Option<Arc<dyn AcquisitionListener>>>>,
    state: watch::Receiver<AcquisitionState>,
    task: JoinHandle<Result<Location, AcquireError>>,
}

impl AcquisitionHandle {
    /// Stop the acquisition and detach the listener. Idempotent.
    pub fn cancel(&self) {
        self.listener.lock().take();
        self.cancel.cancel();
    }

    pub fn state(&self) -> AcquisitionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AcquisitionState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<Location, AcquireError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Acquisition task failed: {}", e);
                Err(AcquireError::Cancelled)
            }
        }
    }
}
