//! Acquisition pipeline services: orchestrator, polling, observers and the
//! application context tying them to the store and the weather sources.

pub mod app_services;
pub mod observers;
pub mod orchestrator;
pub mod polling;

pub use app_services::AppServices;
pub use observers::{EventBus, Notifier, TracingObserver, UpdateEvent, WidgetUpdater};
pub use orchestrator::{
    AcquireError, AcquireOptions, AcquisitionHandle, AcquisitionListener, AcquisitionState,
    Orchestrator,
};
pub use polling::{PollingOutcome, PollingReport, PollingScheduler, PollingTrigger, RefreshResult};
