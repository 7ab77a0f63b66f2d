//! Reconciliation coordinator.
//!
//! The coordinator owns the authoritative [`DeliverySnapshot`]. Each cycle it
//! polls the Parcel API, normalizes the entries, merges them into the
//! previous snapshot, applies the retention policy, and publishes the result
//! together with a [`ChangeSet`].
//!
//! - Cycles are triggered by a timer (first tick immediate, missed ticks
//!   skipped) or on demand through [`CoordinatorHandle::refresh`].
//! - At most one cycle is in flight. Triggers that arrive while a cycle runs
//!   resolve with that cycle's outcome.
//! - A failed poll leaves the snapshot untouched; the failure is recorded in
//!   [`CoordinatorStatus`] and published as [`DeliveryEvent::PollFailed`].
//! - Merge, retention and publish happen without yielding, so a snapshot is
//!   never observed between merge and retention.

mod merge;
mod retention;
mod snapshot;
mod status;

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
pub use merge::{ChangeSet, reconcile};
use parking_lot::{Mutex, RwLock};
pub use retention::{DEFAULT_THRESHOLD_DAYS, RetentionPolicy};
use serde_json::Value;
pub use snapshot::{DeliverySnapshot, TrackedDelivery};
pub use status::{CoordinatorState, CoordinatorStatus};
use tokio::{
    sync::{broadcast, oneshot, watch},
    time::MissedTickBehavior,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    client::{ApiError, DeliveryApi, FilterMode},
    config::ParcelSyncConfig,
    delivery::{DeliveryKey, DeliveryRecord},
    events::{DeliveryEvent, EventBus},
};

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Shortest interval that stays within the upstream limit of 20 requests per hour.
pub const MIN_RECOMMENDED_POLL_INTERVAL_SECS: u64 = 180;

/// Floor applied to the timer period.
const MIN_TICK: std::time::Duration = std::time::Duration::from_secs(1);

/// Errors from coordinator lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("coordinator has been stopped")]
    Stopped,
}

/// Runtime settings of a coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub poll_interval: std::time::Duration,
    pub filter_mode: FilterMode,
    pub retention: RetentionPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            filter_mode: FilterMode::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &ParcelSyncConfig) -> Self {
        Self {
            poll_interval: config.parcel.poll_interval(),
            filter_mode: config.parcel.filter_mode,
            retention: RetentionPolicy::from_config(&config.retention),
        }
    }
}

/// Result of one successful cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub changes: ChangeSet,
    /// Snapshot published by this cycle.
    pub snapshot: Arc<DeliverySnapshot>,
    /// Entries in the API response.
    pub fetched: usize,
    /// Entries dropped as malformed.
    pub dropped: usize,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CycleReport {
    fn records_for<'a>(
        &'a self,
        keys: &'a [DeliveryKey],
    ) -> impl Iterator<Item = DeliveryRecord> + 'a {
        keys.iter().filter_map(|key| self.snapshot.record(key).cloned())
    }

    fn to_event(&self) -> DeliveryEvent {
        DeliveryEvent::DeliveriesChanged {
            timestamp: self.completed_at,
            generation: self.snapshot.generation(),
            added: self.records_for(&self.changes.added).collect(),
            updated: self.records_for(&self.changes.updated).collect(),
            removed: self.changes.removed.clone(),
            evicted: self.changes.evicted.clone(),
            dropped: self.dropped,
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(Arc<CycleReport>),
    Failed(ApiError),
    /// The coordinator stopped or was reconfigured before the result was merged.
    Cancelled,
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

type SharedCycle = Shared<BoxFuture<'static, CycleOutcome>>;

/// One scheduler generation: a client, its settings, and its in-flight slot.
struct Runner {
    api: Arc<dyn DeliveryApi>,
    settings: CoordinatorSettings,
    cancel: CancellationToken,
    in_flight: Mutex<Option<SharedCycle>>,
}

impl Runner {
    fn new(
        api: Arc<dyn DeliveryApi>,
        settings: CoordinatorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            settings,
            cancel,
            in_flight: Mutex::new(None),
        }
    }
}

struct Inner {
    snapshot_tx: watch::Sender<Arc<DeliverySnapshot>>,
    status: RwLock<CoordinatorStatus>,
    events: EventBus,
    runner: RwLock<Arc<Runner>>,
    /// Serializes merge and publish across scheduler generations.
    publish_lock: Mutex<()>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Builder for a running coordinator.
pub struct Coordinator {
    api: Arc<dyn DeliveryApi>,
    settings: CoordinatorSettings,
    events: EventBus,
    seed: Arc<DeliverySnapshot>,
}

impl Coordinator {
    pub fn new(api: Arc<dyn DeliveryApi>, settings: CoordinatorSettings) -> Self {
        Self {
            api,
            settings,
            events: EventBus::new(),
            seed: Arc::new(DeliverySnapshot::empty()),
        }
    }

    /// Publish events on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Start from `snapshot` instead of an empty snapshot.
    pub fn with_snapshot(mut self, snapshot: Arc<DeliverySnapshot>) -> Self {
        self.seed = snapshot;
        self
    }

    /// Spawn the scheduler. Must be called inside a tokio runtime.
    pub fn start(self) -> CoordinatorHandle {
        let shutdown = CancellationToken::new();
        let runner = Arc::new(Runner::new(
            self.api,
            self.settings,
            shutdown.child_token(),
        ));
        let (snapshot_tx, _) = watch::channel(self.seed);

        let inner = Arc::new(Inner {
            snapshot_tx,
            status: RwLock::new(CoordinatorStatus::default()),
            events: self.events,
            runner: RwLock::new(runner.clone()),
            publish_lock: Mutex::new(()),
            shutdown,
            tasks: TaskTracker::new(),
        });

        spawn_scheduler(&inner, runner);
        CoordinatorHandle { inner }
    }
}

/// Cloneable handle to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("deliveries", &self.inner.snapshot_tx.borrow().len())
            .field("state", &self.inner.status.read().state)
            .finish()
    }
}

impl CoordinatorHandle {
    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<DeliverySnapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<DeliverySnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.inner.status.read().clone()
    }

    pub fn settings(&self) -> CoordinatorSettings {
        self.inner.runner.read().settings.clone()
    }

    pub fn is_cycle_in_flight(&self) -> bool {
        self.inner.runner.read().in_flight.lock().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.inner.shutdown.cancelled().await
    }

    /// Run a cycle now, or join the one already in flight.
    pub async fn refresh(&self) -> CycleOutcome {
        let runner = self.inner.runner.read().clone();
        trigger(&self.inner, &runner).await
    }

    /// Like [`refresh`](Self::refresh) without waiting for the outcome.
    pub fn request_refresh(&self) {
        let runner = self.inner.runner.read().clone();
        drop(trigger(&self.inner, &runner));
    }

    /// Replace the client and settings.
    ///
    /// The old scheduler is cancelled (an in-flight poll is discarded) and a
    /// new one starts from the current snapshot, polling immediately.
    pub async fn reconfigure(
        &self,
        settings: CoordinatorSettings,
        api: Arc<dyn DeliveryApi>,
    ) -> Result<(), CoordinatorError> {
        if self.is_stopped() {
            return Err(CoordinatorError::Stopped);
        }

        let runner = Arc::new(Runner::new(
            api,
            settings,
            self.inner.shutdown.child_token(),
        ));
        let previous = std::mem::replace(&mut *self.inner.runner.write(), runner.clone());
        previous.cancel.cancel();

        let pending = previous.in_flight.lock().clone();
        if let Some(cycle) = pending {
            cycle.await;
        }

        tracing::info!(
            poll_interval_secs = runner.settings.poll_interval.as_secs(),
            filter_mode = %runner.settings.filter_mode,
            "Delivery coordinator reconfigured"
        );
        spawn_scheduler(&self.inner, runner);
        Ok(())
    }

    /// Cancel the scheduler and any in-flight poll, then wait for all tasks.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.status.write().state = CoordinatorState::Stopped;
        tracing::info!("Delivery coordinator stopped");
    }
}

fn spawn_scheduler(inner: &Arc<Inner>, runner: Arc<Runner>) {
    let poll_interval = runner.settings.poll_interval;
    if poll_interval.as_secs() < MIN_RECOMMENDED_POLL_INTERVAL_SECS {
        tracing::warn!(
            poll_interval_secs = poll_interval.as_secs(),
            recommended_min_secs = MIN_RECOMMENDED_POLL_INTERVAL_SECS,
            "Poll interval is below the recommended minimum; the Parcel API allows 20 requests per hour"
        );
    }

    tracing::info!(
        poll_interval_secs = poll_interval.as_secs(),
        filter_mode = %runner.settings.filter_mode,
        retention_enabled = runner.settings.retention.enabled,
        retention_threshold_days = runner.settings.retention.threshold.num_days(),
        "Starting delivery scheduler"
    );

    let task_inner = inner.clone();
    inner.tasks.spawn(run_scheduler(task_inner, runner));
}

async fn run_scheduler(inner: Arc<Inner>, runner: Arc<Runner>) {
    let mut ticker = tokio::time::interval(runner.settings.poll_interval.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = runner.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cycle = trigger(&inner, &runner);
        tokio::select! {
            _ = runner.cancel.cancelled() => break,
            _ = cycle => {}
        }
    }

    tracing::debug!("Delivery scheduler exited");
}

/// Return the in-flight cycle, starting one if the slot is empty.
fn trigger(inner: &Arc<Inner>, runner: &Arc<Runner>) -> SharedCycle {
    let mut slot = runner.in_flight.lock();
    if let Some(cycle) = slot.as_ref() {
        return cycle.clone();
    }
    if runner.cancel.is_cancelled() {
        return futures::future::ready(CycleOutcome::Cancelled)
            .boxed()
            .shared();
    }

    let (tx, rx) = oneshot::channel();
    let task_inner = inner.clone();
    let task_runner = runner.clone();
    inner.tasks.spawn(async move {
        let outcome = run_cycle(task_inner, task_runner.clone()).await;
        task_runner.in_flight.lock().take();
        let _ = tx.send(outcome);
    });

    let cycle = async move { rx.await.unwrap_or(CycleOutcome::Cancelled) }
        .boxed()
        .shared();
    *slot = Some(cycle.clone());
    cycle
}

async fn run_cycle(inner: Arc<Inner>, runner: Arc<Runner>) -> CycleOutcome {
    let started = Instant::now();
    inner.status.write().begin(Utc::now());

    let fetched = tokio::select! {
        biased;
        _ = runner.cancel.cancelled() => None,
        result = runner.api.fetch_deliveries(runner.settings.filter_mode) => Some(result),
    };

    match fetched {
        None => {
            inner.mark_cancelled();
            CycleOutcome::Cancelled
        }
        Some(Ok(entries)) => inner.merge_and_publish(&runner, entries, started),
        Some(Err(error)) => inner.record_failure(&runner, error),
    }
}

impl Inner {
    fn merge_and_publish(
        &self,
        runner: &Runner,
        entries: Vec<Value>,
        started: Instant,
    ) -> CycleOutcome {
        self.status.write().state = CoordinatorState::Merging;
        let fetched = entries.len();
        let (records, dropped) = normalize(entries);

        let _guard = self.publish_lock.lock();
        if runner.cancel.is_cancelled() {
            self.mark_cancelled();
            return CycleOutcome::Cancelled;
        }

        let now = Utc::now();
        let prior = self.snapshot_tx.borrow().clone();
        let (next, changes) = reconcile(&prior, records, now, &runner.settings.retention);
        let snapshot = Arc::new(next);
        self.snapshot_tx.send_replace(snapshot.clone());
        self.status.write().succeed(now);

        let report = Arc::new(CycleReport {
            changes,
            snapshot,
            fetched,
            dropped,
            completed_at: now,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        if report.changes.is_empty() {
            tracing::debug!(
                deliveries = report.snapshot.len(),
                dropped = report.dropped,
                duration_ms = report.duration_ms,
                "Delivery poll complete, no changes"
            );
        } else {
            tracing::info!(
                added = report.changes.added.len(),
                updated = report.changes.updated.len(),
                removed = report.changes.removed.len(),
                evicted = report.changes.evicted.len(),
                dropped = report.dropped,
                deliveries = report.snapshot.len(),
                duration_ms = report.duration_ms,
                "Delivery poll complete"
            );
        }

        self.events.publish(report.to_event());
        CycleOutcome::Completed(report)
    }

    fn record_failure(&self, runner: &Runner, error: ApiError) -> CycleOutcome {
        let _guard = self.publish_lock.lock();
        if runner.cancel.is_cancelled() {
            self.mark_cancelled();
            return CycleOutcome::Cancelled;
        }

        let consecutive_failures = {
            let mut status = self.status.write();
            status.fail(&error);
            status.consecutive_failures
        };

        tracing::warn!(
            error = %error,
            kind = %error.kind(),
            consecutive_failures = consecutive_failures,
            "Delivery poll failed, keeping previous snapshot"
        );

        self.events.publish(DeliveryEvent::PollFailed {
            timestamp: Utc::now(),
            error_kind: error.kind(),
            message: error.message().to_string(),
            consecutive_failures,
        });
        CycleOutcome::Failed(error)
    }

    fn mark_cancelled(&self) {
        let mut status = self.status.write();
        if status.state != CoordinatorState::Stopped {
            status.state = CoordinatorState::Idle;
        }
        tracing::debug!("Delivery poll cancelled before merge");
    }
}

/// Normalize raw entries, dropping the malformed ones.
fn normalize(entries: Vec<Value>) -> (Vec<DeliveryRecord>, usize) {
    let mut dropped = 0;
    let records = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match DeliveryRecord::from_value(entry) {
            Ok(record) => Some(record),
            Err(error) => {
                dropped += 1;
                tracing::warn!(index, error = %error, "Dropping malformed delivery entry");
                None
            }
        })
        .collect();
    (records, dropped)
}
