//! Polling Scheduler.
//!
//! Refreshes every saved location on a timer. The primary location (index 0)
//! goes first and notifies eagerly; the rest run concurrently with silent
//! updates, and widgets get the whole list once at the end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nimbus_core::{PollingConfig, RequestErrorType};
use nimbus_weather::Location;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::observers::{EventBus, UpdateEvent, WidgetUpdater};
use crate::orchestrator::{AcquireError, AcquireOptions, Orchestrator};

/// What started a polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingTrigger {
    /// The scheduler's own timer
    Scheduled,
    /// A clock tick from the host; only refreshes when a run is due
    TimeTick,
    /// Explicit user request
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshResult {
    Refreshed,
    /// `None` for cancellations and storage failures
    Failed(Option<RequestErrorType>),
}

impl From<&Result<Location, AcquireError>> for RefreshResult {
    fn from(result: &Result<Location, AcquireError>) -> Self {
        match result {
            Ok(_) => Self::Refreshed,
            Err(e) => Self::Failed(e.request_error()),
        }
    }
}

/// Per-location results of one run, in list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollingReport {
    pub results: Vec<(String, RefreshResult)>,
}

impl PollingReport {
    pub fn refreshed(&self) -> Vec<String> {
        self.ids_where(|r| r == RefreshResult::Refreshed)
    }

    pub fn failed(&self) -> Vec<String> {
        self.ids_where(|r| r != RefreshResult::Refreshed)
    }

    pub fn has_failures(&self) -> bool {
        self.results
            .iter()
            .any(|(_, r)| *r != RefreshResult::Refreshed)
    }

    /// Failures worth retrying early. Unknown errors count as transient.
    pub fn has_transient_failures(&self) -> bool {
        self.results.iter().any(|(_, r)| match r {
            RefreshResult::Refreshed => false,
            RefreshResult::Failed(Some(kind)) => kind.is_transient(),
            RefreshResult::Failed(None) => true,
        })
    }

    fn ids_where(&self, keep: impl Fn(RefreshResult) -> bool) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, r)| keep(*r))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollingOutcome {
    /// Another run was in flight
    Skipped,
    /// Time tick before the active interval elapsed
    NotDue,
    Completed(PollingReport),
    /// The location list could not be read
    Aborted(String),
}

#[derive(Debug, Clone, Copy)]
struct LastRun {
    at: Instant,
    had_failures: bool,
}

/// Clears the in-flight flag when the run ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PollingScheduler {
    orchestrator: Arc<Orchestrator>,
    widgets: Arc<dyn WidgetUpdater>,
    events: EventBus,
    config: PollingConfig,
    in_flight: AtomicBool,
    last_run: Mutex<Option<LastRun>>,
    wake: Notify,
    /// Token of the run in progress
    current_run: Mutex<Option<CancellationToken>>,
}

impl PollingScheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        widgets: Arc<dyn WidgetUpdater>,
        events: EventBus,
        config: PollingConfig,
    ) -> Self {
        Self {
            orchestrator,
            widgets,
            events,
            config,
            in_flight: AtomicBool::new(false),
            last_run: Mutex::new(None),
            wake: Notify::new(),
            current_run: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Shortened after a run with failures.
    pub fn active_interval(&self) -> Duration {
        let minutes = match *self.last_run.lock() {
            Some(LastRun {
                had_failures: true, ..
            }) => self.config.retry_interval_minutes,
            _ => self.config.interval_minutes,
        };
        Duration::from_secs(u64::from(minutes) * 60)
    }

    /// Time until the next scheduled run.
    pub fn next_delay(&self) -> Duration {
        let interval = self.active_interval();
        match *self.last_run.lock() {
            Some(last) => interval.saturating_sub(last.at.elapsed()),
            None => interval,
        }
    }

    pub fn is_due(&self) -> bool {
        let interval = self.active_interval();
        match *self.last_run.lock() {
            Some(last) => last.at.elapsed() >= interval,
            None => true,
        }
    }

    /// Wake the [`run`](Self::run) loop with a time tick.
    pub fn tick(&self) {
        self.wake.notify_one();
    }

    /// Cancel in-flight acquisitions of the current run. The run still
    /// completes with those locations failed; later runs are unaffected.
    pub fn stop(&self) {
        if let Some(run) = self.current_run.lock().as_ref() {
            run.cancel();
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn refresh_all(&self, trigger: PollingTrigger) -> PollingOutcome {
        if trigger == PollingTrigger::TimeTick && !self.is_due() {
            tracing::trace!("Polling not due");
            return PollingOutcome::NotDue;
        }
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("Polling already in progress");
            return PollingOutcome::Skipped;
        };

        let locations = match self.orchestrator.store().list().await {
            Ok(locations) => locations,
            Err(e) => {
                tracing::error!("Failed to load locations: {}", e);
                self.record(true);
                return PollingOutcome::Aborted(e.to_string());
            }
        };

        tracing::info!("Refreshing {} locations", locations.len());
        let cancel = CancellationToken::new();
        *self.current_run.lock() = Some(cancel.clone());
        let report = self.refresh(locations, trigger, &cancel).await;
        self.current_run.lock().take();

        let failed = report.failed();
        if !failed.is_empty() {
            tracing::warn!("{} locations failed to refresh", failed.len());
        }

        match self.orchestrator.store().list().await {
            Ok(stored) => self.widgets.update_locations(&stored),
            Err(e) => tracing::warn!("Failed to reload locations for widgets: {}", e),
        }
        self.events.emit(UpdateEvent::PollingCompleted {
            refreshed: report.refreshed(),
            failed,
        });
        self.record(report.has_transient_failures());

        PollingOutcome::Completed(report)
    }

    async fn refresh(
        &self,
        locations: Vec<Location>,
        trigger: PollingTrigger,
        cancel: &CancellationToken,
    ) -> PollingReport {
        let background = trigger != PollingTrigger::Manual && self.config.background_location;
        let options = AcquireOptions {
            background,
            ..AcquireOptions::default()
        };
        let mut locations = locations.into_iter();
        let Some(primary) = locations.next() else {
            return PollingReport::default();
        };

        let mut results = vec![(
            primary.formatted_id.clone(),
            RefreshResult::from(&self.orchestrator.acquire(&primary, options, cancel).await),
        )];

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let mut rest: Vec<(String, Option<RefreshResult>)> = Vec::new();

        for (index, location) in locations.enumerate() {
            rest.push((location.formatted_id.clone(), None));
            let orchestrator = Arc::clone(&self.orchestrator);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, RefreshResult::Failed(None));
                };
                let result = orchestrator
                    .acquire(&location, options.silent(), &cancel)
                    .await;
                (index, RefreshResult::from(&result))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Some(slot) = rest.get_mut(index) {
                        slot.1 = Some(result);
                    }
                }
                Err(e) => tracing::error!("Refresh task failed: {}", e),
            }
        }

        results.extend(
            rest.into_iter()
                .map(|(id, result)| (id, result.unwrap_or(RefreshResult::Failed(None)))),
        );
        PollingReport { results }
    }

    fn record(&self, had_failures: bool) {
        *self.last_run.lock() = Some(LastRun {
            at: Instant::now(),
            had_failures,
        });
    }

    /// Drive scheduled runs until `cancel` fires. A run in progress when it
    /// fires is abandoned.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.enabled {
            tracing::info!("Polling disabled");
            return;
        }
        tracing::info!("Polling every {} minutes", self.config.interval_minutes);

        loop {
            let trigger = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.next_delay()) => PollingTrigger::Scheduled,
                _ = self.wake.notified() => PollingTrigger::TimeTick,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.refresh_all(trigger) => {
                    tracing::debug!("Polling run finished: {:?}", outcome);
                }
            }
        }
        tracing::info!("Polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_partitions_ids() {
        let report = PollingReport {
            results: vec![
                ("a".to_string(), RefreshResult::Refreshed),
                (
                    "b".to_string(),
                    RefreshResult::Failed(Some(RequestErrorType::WeatherReqFailed)),
                ),
                ("c".to_string(), RefreshResult::Failed(None)),
            ],
        };
        assert_eq!(report.refreshed(), vec!["a"]);
        assert_eq!(report.failed(), vec!["b", "c"]);
        assert!(report.has_failures());
        assert!(!PollingReport::default().has_failures());
        assert!(report.has_transient_failures());
    }

    #[test]
    fn test_api_limit_is_not_transient() {
        let report = PollingReport {
            results: vec![(
                "a".to_string(),
                RefreshResult::Failed(Some(RequestErrorType::ApiLimitReached)),
            )],
        };
        assert!(report.has_failures());
        assert!(!report.has_transient_failures());
    }

    #[test]
    fn test_flight_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = FlightGuard::acquire(&flag);
        assert!(guard.is_some());
        assert!(FlightGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(FlightGuard::acquire(&flag).is_some());
    }
}
