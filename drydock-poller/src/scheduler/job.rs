//! Image polling job
//!
//! Ties the scheduler, the worker pool, the digest cache and the lookup
//! coordinator into the running engine. A recurring tick claims due
//! schedule entries and turns them into poll tasks; settings changes
//! re-derive the tick interval and the set of entries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use drydock_core::Clock;
use drydock_core::domain::schedule::PollTarget;
use drydock_core::domain::workload::{Workload, WorkloadId};
use drydock_core::dto::health::HealthReport;
use drydock_core::dto::polling::{EntrySummary, PollingSnapshot};
use drydock_registry::DigestLookup;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{ImageCheckExecutor, LookupCoordinator};
use super::interval::{
    DEFAULT_POLLING_ENABLED, DEFAULT_POLLING_INTERVAL_MINUTES, PollingPlan, clamp_minutes,
    resolve_workload,
};
use super::schedule::PollingScheduler;
use super::sweep::SweepTracker;
use crate::cache::DigestCache;
use crate::config::PollerConfig;
use crate::health::HealthThresholds;
use crate::service::{
    CredentialStore, POLLING_ENABLED_KEY, POLLING_INTERVAL_KEY, SettingsEvent, SettingsProvider,
    UpdateSink, WorkloadCatalog,
};
use crate::worker::{ImageCheck, PollTask, PollingWorkerPool};

/// Everything the job talks to outside the engine
pub struct Collaborators {
    pub settings: Arc<dyn SettingsProvider>,
    pub fleet: Arc<dyn WorkloadCatalog>,
    pub registry: Arc<dyn DigestLookup>,
    pub credentials: Arc<dyn CredentialStore>,
    pub updates: Arc<dyn UpdateSink>,
    pub clock: Arc<dyn Clock>,
}

struct TickHandle {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The polling engine
pub struct ImagePollingJob {
    settings: Arc<dyn SettingsProvider>,
    fleet: Arc<dyn WorkloadCatalog>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<PollingScheduler>,
    cache: Arc<DigestCache>,
    coordinator: Arc<LookupCoordinator>,
    pool: PollingWorkerPool,
    min_interval: Duration,
    thresholds: HealthThresholds,
    cancel: CancellationToken,
    tick: tokio::sync::Mutex<Option<TickHandle>>,
    settings_events: Mutex<Option<broadcast::Receiver<SettingsEvent>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    ticks: AtomicU64,
    started_at: DateTime<Utc>,
}

impl ImagePollingJob {
    /// Builds the engine; nothing runs until `start`
    ///
    /// Subscribes to settings changes right away so none published between
    /// construction and `start` are lost.
    pub fn new(config: &PollerConfig, collaborators: Collaborators) -> Arc<Self> {
        let Collaborators {
            settings,
            fleet,
            registry,
            credentials,
            updates,
            clock,
        } = collaborators;

        let cache = Arc::new(DigestCache::new(
            config.cache_ttl,
            config.cache_max_size,
            Arc::clone(&clock),
        ));
        let coordinator = Arc::new(LookupCoordinator::new());
        let executor = Arc::new(ImageCheckExecutor::new(
            registry,
            credentials,
            Arc::clone(&cache),
            Arc::clone(&coordinator),
            updates,
            Arc::clone(&clock),
        ));
        let pool = PollingWorkerPool::new(
            executor,
            config.workers,
            config.queue_capacity,
            config.task_timeout,
        );
        let scheduler = Arc::new(PollingScheduler::with_backoff(
            Arc::clone(&clock),
            config.backoff,
        ));
        let events = settings.subscribe();

        Arc::new(Self {
            settings,
            fleet,
            started_at: clock.now(),
            clock,
            scheduler,
            cache,
            coordinator,
            pool,
            min_interval: config.min_interval,
            thresholds: HealthThresholds::default(),
            cancel: CancellationToken::new(),
            tick: tokio::sync::Mutex::new(None),
            settings_events: Mutex::new(Some(events)),
            listener: Mutex::new(None),
            ticks: AtomicU64::new(0),
        })
    }

    /// Starts the workers, registers the schedule and listens for settings
    /// changes
    ///
    /// Returns the tick interval, `None` when polling is disabled
    /// everywhere. The first tick fires one interval after start; callers
    /// wanting an immediate sweep call `run_tick`.
    pub async fn start(self: &Arc<Self>) -> Result<Option<Duration>> {
        self.pool
            .start(&self.cancel)
            .context("Failed to start worker pool")?;

        let tick = self.register().await?;

        let events = self
            .settings_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(events) = events {
            let listener = self.spawn_settings_listener(events);
            *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        }

        info!(
            workers = self.pool.workers(),
            entries = self.scheduler.size(),
            interval_secs = tick.map(|d| d.as_secs()),
            "Image polling started"
        );
        Ok(tick)
    }

    /// Derives the schedule from settings and the fleet
    ///
    /// Creates an entry for the global sweep and for every enabled
    /// override, drops entries nothing calls for any more, and schedules
    /// the tick at the shortest enabled interval.
    pub async fn register(self: &Arc<Self>) -> Result<Option<Duration>> {
        let tick = self.sync_schedule().await?;
        if tick.is_none() {
            info!("Image polling is disabled everywhere, no tick scheduled");
        }
        Ok(tick)
    }

    /// Re-derives the schedule after a settings change
    ///
    /// Existing entries keep their history. The tick restarts only when its
    /// interval changed.
    pub async fn reschedule(self: &Arc<Self>) -> Result<Option<Duration>> {
        debug!("Rescheduling image polling");
        self.sync_schedule().await
    }

    /// Applies a change to one workload's polling override
    pub async fn handle_project_settings_change(
        self: &Arc<Self>,
        id: &WorkloadId,
    ) -> Result<Option<Duration>> {
        let target = PollTarget::Workload(id.clone());
        let exists = self
            .fleet
            .get_workload(id)
            .await
            .with_context(|| format!("Failed to look up workload {}", id))?
            .is_some();

        let global_enabled = self
            .settings
            .get_bool_setting(POLLING_ENABLED_KEY, DEFAULT_POLLING_ENABLED);
        let global_interval = clamp_minutes(
            self.settings
                .get_int_setting(POLLING_INTERVAL_KEY, DEFAULT_POLLING_INTERVAL_MINUTES),
            self.min_interval,
        );
        let resolved = resolve_workload(
            self.settings.as_ref(),
            id,
            global_enabled,
            global_interval,
            self.min_interval,
        );

        match resolved.own_interval.filter(|_| exists) {
            Some(interval) => self.scheduler.upsert(target, interval),
            None => {
                self.scheduler.remove(&target);
            }
        }

        self.reschedule().await
    }

    async fn sync_schedule(self: &Arc<Self>) -> Result<Option<Duration>> {
        let plan = self.plan().await?;

        for (target, interval) in plan.targets() {
            self.scheduler.upsert(target, interval);
        }
        for target in self.scheduler.targets() {
            if plan.interval_for(&target).is_none() {
                self.scheduler.remove(&target);
            }
        }

        let tick = plan.tick();
        self.apply_tick(tick).await;
        Ok(tick)
    }

    async fn plan(&self) -> Result<PollingPlan> {
        let workloads = self
            .fleet
            .list_workloads()
            .await
            .context("Failed to list workloads")?;
        Ok(PollingPlan::resolve(
            self.settings.as_ref(),
            &workloads,
            self.min_interval,
        ))
    }

    /// Swaps the tick task if the interval changed
    ///
    /// The old task is cancelled and joined before a new one starts.
    async fn apply_tick(self: &Arc<Self>, interval: Option<Duration>) {
        let mut current = self.tick.lock().await;
        if current.as_ref().map(|tick| tick.interval) == interval {
            return;
        }

        if let Some(old) = current.take() {
            old.cancel.cancel();
            if let Err(e) = old.handle.await {
                warn!("Poll tick task ended abnormally: {}", e);
            }
            if interval.is_none() {
                info!("Image polling disabled, tick stopped");
            }
        }

        if self.cancel.is_cancelled() {
            return;
        }

        if let Some(period) = interval {
            info!(interval_secs = period.as_secs(), "Poll tick scheduled");
            *current = Some(self.spawn_tick(period));
        }
    }

    fn spawn_tick(self: &Arc<Self>, period: Duration) -> TickHandle {
        let cancel = self.cancel.child_token();
        let token = cancel.clone();
        let job = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let Some(job) = job.upgrade() else { break };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = job.run_tick() => match result {
                        Ok(0) => debug!("No schedule entries due"),
                        Ok(submitted) => debug!(tasks = submitted, "Poll tasks submitted"),
                        Err(e) => error!("Error during poll tick: {:#}", e),
                    },
                }
            }

            debug!(interval = ?period, "Poll tick stopped");
        });

        TickHandle {
            interval: period,
            cancel,
            handle,
        }
    }

    fn spawn_settings_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<SettingsEvent>,
    ) -> JoinHandle<()> {
        let job: Weak<Self> = Arc::downgrade(self);
        let token = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };

                let Some(job) = job.upgrade() else { break };
                let result = match event {
                    Ok(SettingsEvent::GlobalChanged { key }) => {
                        debug!(key = %key, "Global polling setting changed");
                        job.reschedule().await
                    }
                    Ok(SettingsEvent::WorkloadChanged(id)) => {
                        debug!(workload = %id, "Workload polling setting changed");
                        job.handle_project_settings_change(&id).await
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Missed settings changes, rescheduling from scratch");
                        job.reschedule().await
                    }
                    Err(RecvError::Closed) => break,
                };

                if let Err(e) = result {
                    error!("Failed to apply settings change: {:#}", e);
                }
            }
        })
    }

    /// Runs one tick: claims every due entry and submits a task for it
    ///
    /// Settings are read once per tick. Returns the number of tasks
    /// submitted; completion is asynchronous.
    pub async fn run_tick(&self) -> Result<usize> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let workloads = self
            .fleet
            .list_workloads()
            .await
            .context("Failed to list workloads")?;
        let plan = PollingPlan::resolve(self.settings.as_ref(), &workloads, self.min_interval);

        let horizon = chrono::Duration::from_std(plan.claim_horizon()).unwrap_or_default();
        let due = self.scheduler.claim_due(self.clock.now() + horizon);
        if due.is_empty() {
            return Ok(0);
        }

        let by_id: HashMap<&WorkloadId, &Workload> =
            workloads.iter().map(|w| (&w.id, w)).collect();

        // Claimed entries must become tasks before the next await so a
        // cancelled tick cannot leave one stuck in flight
        let mut claimed = Vec::with_capacity(due.len());
        for entry in due {
            let images: Vec<ImageCheck> = match &entry.target {
                PollTarget::Global if plan.global.is_some() => plan
                    .swept
                    .iter()
                    .filter_map(|id| by_id.get(id))
                    .flat_map(|w| image_checks(w))
                    .collect(),
                PollTarget::Workload(id) if plan.overrides.contains_key(id) => by_id
                    .get(id)
                    .map(|w| image_checks(w))
                    .unwrap_or_default(),
                _ => {
                    debug!(target = %entry.target, "Dropping schedule entry with no polling left");
                    self.scheduler.remove(&entry.target);
                    continue;
                }
            };
            claimed.push((entry, images));
        }

        if claimed.is_empty() {
            return Ok(0);
        }

        let tracker = Arc::new(SweepTracker::new(tick, claimed.len()));
        let tasks: Vec<PollTask> = claimed
            .into_iter()
            .map(|(entry, images)| {
                let scheduler = Arc::clone(&self.scheduler);
                let tracker = Arc::clone(&tracker);
                let target = entry.target.clone();
                let scheduled_with = entry.interval;

                PollTask::new(entry.target, images).on_complete(move |outcome| {
                    if outcome.cancelled {
                        scheduler.release(&target);
                    } else {
                        scheduler.record_outcome(&target, &outcome, scheduled_with);
                    }
                    tracker.finish(&outcome);
                })
            })
            .collect();

        let count = tasks.len();
        debug!(tick, tasks = count, "Submitting due poll tasks");
        for task in tasks {
            // Unsubmitted tasks release their entries when dropped
            self.pool
                .submit(task)
                .await
                .context("Worker pool rejected poll task")?;
        }

        Ok(count)
    }

    /// Interval of the running tick, `None` when no tick is scheduled
    pub async fn current_interval(&self) -> Option<Duration> {
        self.tick.lock().await.as_ref().map(|tick| tick.interval)
    }

    /// Point-in-time view of the engine with its health evaluated
    pub async fn snapshot(&self) -> PollingSnapshot {
        let entries = self.scheduler.entries();
        let tick = self.current_interval().await;

        let mut snapshot = PollingSnapshot {
            generated_at: self.clock.now(),
            tick_interval_secs: tick.map(|d| d.as_secs()),
            scheduler_size: entries.len(),
            queue_size: self.pool.queue_size(),
            queue_capacity: self.pool.capacity(),
            coalesced_in_flight: self.coordinator.in_flight(),
            cache: self.cache.stats(),
            entries: entries.iter().map(EntrySummary::from).collect(),
            health: HealthReport::healthy(),
        };
        snapshot.health = self.thresholds.evaluate(&snapshot, self.started_at);
        snapshot
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &DigestCache {
        &self.cache
    }

    pub fn pool(&self) -> &PollingWorkerPool {
        &self.pool
    }

    pub fn coordinator(&self) -> &LookupCoordinator {
        &self.coordinator
    }

    /// Stops ticking, stops listening and shuts the pool down
    ///
    /// Tasks still queued complete as cancelled and release their entries.
    pub async fn shutdown(&self) {
        info!("Stopping image polling");
        self.cancel.cancel();

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!("Settings listener ended abnormally: {}", e);
            }
        }

        let tick = self.tick.lock().await.take();
        if let Some(tick) = tick {
            tick.cancel.cancel();
            if let Err(e) = tick.handle.await {
                warn!("Poll tick task ended abnormally: {}", e);
            }
        }

        self.pool.shutdown().await;
    }
}

fn image_checks(workload: &Workload) -> Vec<ImageCheck> {
    workload
        .images
        .iter()
        .map(|image| ImageCheck {
            workload: workload.id.clone(),
            reference: image.reference.clone(),
            current_digest: image.current_digest.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{InMemoryFleet, InMemorySettings, LoggingUpdateSink, StaticCredentials};
    use async_trait::async_trait;
    use drydock_core::FakeClock;
    use drydock_core::domain::image::{ImageReference, RegistryCredentials};
    use drydock_core::domain::schedule::EntryState;
    use drydock_core::domain::workload::{WorkloadImage, WorkloadPollingSettings};
    use drydock_core::dto::health::HealthStatus;
    use drydock_registry::RegistryError;
    use std::sync::atomic::AtomicUsize;

    const MINUTE: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct FakeRegistry {
        digests: Mutex<HashMap<String, String>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeRegistry {
        fn set(&self, image: &str, digest: &str) {
            let image = ImageReference::parse(image).unwrap().to_string();
            self.digests.lock().unwrap().insert(image, digest.to_string());
        }
    }

    #[async_trait]
    impl DigestLookup for FakeRegistry {
        async fn lookup_digest(
            &self,
            image: &ImageReference,
            _credentials: Option<&RegistryCredentials>,
        ) -> drydock_registry::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.digests
                .lock()
                .unwrap()
                .get(&image.to_string())
                .cloned()
                .ok_or_else(|| RegistryError::status(404, "manifest unknown"))
        }
    }

    struct Harness {
        job: Arc<ImagePollingJob>,
        settings: Arc<InMemorySettings>,
        fleet: Arc<InMemoryFleet>,
        registry: Arc<FakeRegistry>,
        updates: Arc<LoggingUpdateSink>,
        clock: FakeClock,
    }

    fn workload(id: &str, images: &[(&str, &str)]) -> Workload {
        Workload {
            id: WorkloadId::new(id),
            name: id.to_string(),
            images: images
                .iter()
                .map(|(reference, digest)| WorkloadImage {
                    reference: reference.to_string(),
                    current_digest: Some(digest.to_string()),
                })
                .collect(),
        }
    }

    fn harness_with(registry: FakeRegistry, configure: impl FnOnce(&InMemorySettings)) -> Harness {
        let clock = FakeClock::new();
        let settings = Arc::new(InMemorySettings::new());
        configure(&settings);

        let fleet = Arc::new(InMemoryFleet::new());
        fleet.upsert(workload("web", &[("nginx:1.25", "sha256:old")]));
        fleet.upsert(workload("db", &[("postgres:16", "sha256:pg")]));

        let registry = Arc::new(registry);
        registry.set("nginx:1.25", "sha256:new");
        registry.set("postgres:16", "sha256:pg");

        let updates = Arc::new(LoggingUpdateSink::new());
        let job = ImagePollingJob::new(
            &PollerConfig::default(),
            Collaborators {
                settings: settings.clone(),
                fleet: fleet.clone(),
                registry: registry.clone(),
                credentials: Arc::new(StaticCredentials::new()),
                updates: updates.clone(),
                clock: Arc::new(clock.clone()),
            },
        );

        Harness {
            job,
            settings,
            fleet,
            registry,
            updates,
            clock,
        }
    }

    fn harness(configure: impl FnOnce(&InMemorySettings)) -> Harness {
        harness_with(FakeRegistry::default(), configure)
    }

    /// Waits until no entry is in flight and the queue is empty
    async fn settle(job: &ImagePollingJob) {
        for _ in 0..500 {
            let busy = job
                .scheduler()
                .entries()
                .iter()
                .any(|e| e.state == EntryState::InFlight);
            if !busy && job.pool().queue_size() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("poll tasks did not settle");
    }

    async fn wait_for_interval(job: &ImagePollingJob, expected: Option<Duration>) {
        for _ in 0..500 {
            if job.current_interval().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tick interval never became {:?}", expected);
    }

    #[tokio::test]
    async fn test_start_uses_shortest_enabled_interval() {
        let h = harness(|settings| {
            settings
                .set_workload_settings("web", WorkloadPollingSettings::enabled_every(10))
                .unwrap();
        });

        let tick = h.job.start().await.unwrap();
        assert_eq!(tick, Some(MINUTE * 10));
        assert_eq!(h.job.current_interval().await, Some(MINUTE * 10));
        assert_eq!(h.job.scheduler().size(), 2);
        assert!(h.job.scheduler().get(&PollTarget::workload("web")).is_some());

        h.job.shutdown().await;
    }

    #[tokio::test]
    async fn test_nothing_enabled_schedules_no_tick() {
        let h = harness(|settings| settings.set_bool(POLLING_ENABLED_KEY, false).unwrap());

        assert_eq!(h.job.start().await.unwrap(), None);
        assert_eq!(h.job.current_interval().await, None);
        assert_eq!(h.job.scheduler().size(), 0);
        assert_eq!(h.job.run_tick().await.unwrap(), 0);

        h.job.shutdown().await;
    }

    #[tokio::test]
    async fn test_reschedule_keeps_entry_history() {
        let h = harness(|_| {});
        h.job.start().await.unwrap();
        assert_eq!(h.job.current_interval().await, Some(MINUTE * 60));

        assert_eq!(h.job.run_tick().await.unwrap(), 1);
        settle(&h.job).await;
        let before = h.job.scheduler().get(&PollTarget::Global).unwrap();
        assert!(before.last_success_time.is_some());

        h.settings.set_int(POLLING_INTERVAL_KEY, 30).unwrap();
        assert_eq!(h.job.reschedule().await.unwrap(), Some(MINUTE * 30));
        assert_eq!(h.job.current_interval().await, Some(MINUTE * 30));

        let after = h.job.scheduler().get(&PollTarget::Global).unwrap();
        assert_eq!(after.last_success_time, before.last_success_time);
        assert_eq!(after.interval, MINUTE * 30);
        assert!(after.next_poll_time < before.next_poll_time);

        h.job.shutdown().await;
    }

    #[tokio::test]
    async fn test_tick_polls_due_entries_and_records_outcomes() {
        let h = harness(|settings| {
            settings
                .set_workload_settings("db", WorkloadPollingSettings::enabled_every(10))
                .unwrap();
        });
        h.job.start().await.unwrap();

        assert_eq!(h.job.run_tick().await.unwrap(), 2);
        settle(&h.job).await;

        let now = h.clock.now();
        let global = h.job.scheduler().get(&PollTarget::Global).unwrap();
        assert_eq!(global.consecutive_failures, 0);
        assert_eq!(global.last_success_time, Some(now));
        assert_eq!(
            global.next_poll_time,
            now + chrono::Duration::minutes(60)
        );

        let db = h.job.scheduler().get(&PollTarget::workload("db")).unwrap();
        assert_eq!(db.next_poll_time, now + chrono::Duration::minutes(10));

        // nginx moved, postgres did not
        assert_eq!(h.updates.announced(), 1);

        // Nothing is due until the shorter interval elapses
        assert_eq!(h.job.run_tick().await.unwrap(), 0);
        h.clock.advance(MINUTE * 10);
        assert_eq!(h.job.run_tick().await.unwrap(), 1);
        settle(&h.job).await;

        h.job.shutdown().await;
    }

    /// Wall clock driven by tokio's (pausable) time
    struct TokioClock {
        origin: Instant,
        base: DateTime<Utc>,
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_polls_once_per_interval() {
        let base = Utc::now();
        let clock = Arc::new(TokioClock {
            origin: Instant::now(),
            base,
        });

        let fleet = Arc::new(InMemoryFleet::new());
        fleet.upsert(workload("web", &[("nginx:1.25", "sha256:old")]));
        let registry = Arc::new(FakeRegistry {
            delay: Some(Duration::from_millis(500)),
            ..FakeRegistry::default()
        });
        registry.set("nginx:1.25", "sha256:new");

        let config = PollerConfig {
            cache_ttl: MINUTE,
            ..PollerConfig::default()
        };
        let job = ImagePollingJob::new(
            &config,
            Collaborators {
                settings: Arc::new(InMemorySettings::new()),
                fleet,
                registry: registry.clone(),
                credentials: Arc::new(StaticCredentials::new()),
                updates: Arc::new(LoggingUpdateSink::new()),
                clock,
            },
        );
        assert_eq!(job.start().await.unwrap(), Some(MINUTE * 60));

        // Ticks at 60, 120, ... 360 minutes
        tokio::time::sleep(MINUTE * (6 * 60 + 2)).await;

        assert_eq!(registry.calls.load(Ordering::SeqCst), 6);
        let global = job.scheduler().get(&PollTarget::Global).unwrap();
        assert_eq!(global.consecutive_failures, 0);
        assert!(global.last_success_time.unwrap() > base + chrono::Duration::minutes(360));

        job.shutdown().await;
    }

    #[tokio::test]
    async fn test_claimed_entries_are_not_resubmitted() {
        let registry = FakeRegistry {
            delay: Some(Duration::from_millis(300)),
            ..FakeRegistry::default()
        };
        let h = harness_with(registry, |_| {});
        h.job.start().await.unwrap();

        assert_eq!(h.job.run_tick().await.unwrap(), 1);
        assert_eq!(h.job.run_tick().await.unwrap(), 0);
        assert_eq!(
            h.job.scheduler().get(&PollTarget::Global).unwrap().state,
            EntryState::InFlight
        );

        settle(&h.job).await;
        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 2);

        h.job.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_poll_still_advances() {
        let h = harness(|settings| {
            settings
                .set_workload_settings("gone", WorkloadPollingSettings::enabled_every(10))
                .unwrap();
        });
        h.fleet.upsert(workload("gone", &[("ghcr.io/org/missing:1", "sha256:x")]));
        h.job.start().await.unwrap();

        h.job.run_tick().await.unwrap();
        settle(&h.job).await;

        let now = h.clock.now();
        let entry = h.job.scheduler().get(&PollTarget::workload("gone")).unwrap();
        assert_eq!(entry.consecutive_failures, 1);
        assert!(entry.last_error.is_some());
        assert_eq!(entry.next_poll_time, now + chrono::Duration::minutes(10));

        // The global sweep saw the same failure but other images succeeded
        let global = h.job.scheduler().get(&PollTarget::Global).unwrap();
        assert_eq!(global.consecutive_failures, 0);

        h.job.shutdown().await;
    }

    #[tokio::test]
    async fn test_settings_events_reschedule() {
        let h = harness(|_| {});
        h.job.start().await.unwrap();

        h.settings
            .set_workload_settings("web", WorkloadPollingSettings::enabled_every(10))
            .unwrap();
        wait_for_interval(&h.job, Some(MINUTE * 10)).await;
        assert!(h.job.scheduler().get(&PollTarget::workload("web")).is_some());

        h.settings
            .set_workload_settings("web", WorkloadPollingSettings::disabled())
            .unwrap();
        wait_for_interval(&h.job, Some(MINUTE * 60)).await;
        assert!(h.job.scheduler().get(&PollTarget::workload("web")).is_none());

        h.settings.set_bool(POLLING_ENABLED_KEY, false).unwrap();
        wait_for_interval(&h.job, None).await;
        assert_eq!(h.job.scheduler().size(), 0);

        h.job.shutdown().await;
    }

    #[tokio::test]
    async fn test_override_for_unknown_workload_is_ignored() {
        let h = harness(|_| {});
        h.job.start().await.unwrap();

        let tick = h
            .job
            .handle_project_settings_change(&WorkloadId::new("nope"))
            .await
            .unwrap();
        assert_eq!(tick, Some(MINUTE * 60));
        assert!(h.job.scheduler().get(&PollTarget::workload("nope")).is_none());

        h.job.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_reports_engine_state() {
        let h = harness(|settings| {
            settings
                .set_workload_settings("web", WorkloadPollingSettings::enabled_every(15))
                .unwrap();
        });
        h.job.start().await.unwrap();
        h.job.run_tick().await.unwrap();
        settle(&h.job).await;

        let snapshot = h.job.snapshot().await;
        assert_eq!(snapshot.tick_interval_secs, Some(15 * 60));
        assert_eq!(snapshot.scheduler_size, 2);
        assert_eq!(snapshot.queue_capacity, 100);
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.cache.size, 2);
        assert_eq!(snapshot.health.status, HealthStatus::Healthy);

        h.job.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let h = harness(|_| {});
        h.job.start().await.unwrap();
        h.job.shutdown().await;

        assert_eq!(h.job.current_interval().await, None);
        assert!(h.job.pool().is_closed());
        assert!(h.job.run_tick().await.is_err());
        // The failed submit released the claim
        assert_eq!(
            h.job.scheduler().get(&PollTarget::Global).unwrap().state,
            EntryState::Idle
        );
    }
}
