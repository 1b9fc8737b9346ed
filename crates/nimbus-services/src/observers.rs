//! Observers of acquisition results.
//!
//! [`Notifier`] and [`WidgetUpdater`] are the host's hooks for user-visible
//! side effects. They are fire-and-forget: implementations must not block and
//! report nothing back. [`EventBus`] fans updates out to any number of UI
//! subscribers.

use nimbus_core::RequestErrorType;
use nimbus_weather::Location;
use tokio::sync::broadcast;

/// Posts weather notifications (alerts, precipitation, today's forecast).
pub trait Notifier: Send + Sync {
    /// Decide from the fresh weather whether anything needs showing.
    fn update_if_necessary(&self, location: &Location);
}

/// Refreshes home screen widgets.
pub trait WidgetUpdater: Send + Sync {
    fn update_location(&self, location: &Location);

    fn update_locations(&self, locations: &[Location]);
}

/// Change published on the [`EventBus`].
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    LocationUpdated {
        location: Box<Location>,
    },
    LocationFailed {
        formatted_id: String,
        error: Option<RequestErrorType>,
    },
    PollingCompleted {
        refreshed: Vec<String>,
        failed: Vec<String>,
    },
}

/// Broadcast channel of [`UpdateEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UpdateEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is fine.
    pub fn emit(&self, event: UpdateEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }
}

/// Logs instead of showing anything. Used headless and by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Notifier for TracingObserver {
    fn update_if_necessary(&self, location: &Location) {
        let Some(weather) = &location.weather else {
            return;
        };
        for alert in &weather.alerts {
            tracing::info!(
                "Alert for {}: {} ({:?})",
                location.display_name(),
                alert.title,
                alert.severity
            );
        }
    }
}

impl WidgetUpdater for TracingObserver {
    fn update_location(&self, location: &Location) {
        match &location.weather {
            Some(weather) => tracing::info!(
                "{}: {} {:.1}°C",
                location.display_name(),
                weather.current.condition.description(),
                weather.current.temperature
            ),
            None => tracing::info!("{}: no weather", location.display_name()),
        }
    }

    fn update_locations(&self, locations: &[Location]) {
        tracing::debug!("Updating widgets for {} locations", locations.len());
        for location in locations {
            self.update_location(location);
        }
    }
}
