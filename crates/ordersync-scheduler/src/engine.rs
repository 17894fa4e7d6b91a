use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use ordersync_core::{config::OrderSyncConfig, Clock, JobId};
use ordersync_runner::{
    RunReport, RunRequest, ShopSelection, StatsTracker, SyncEvent, SyncRunner, MAX_LOOKBACK_HOURS,
};
use parking_lot::Mutex;
use tokio::{
    sync::{Notify, Semaphore},
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{store::JobStore, types::ScheduledJob};

/// Loop tuning, normally taken from the `[scheduler]` and `[sync]` config sections.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub tick_interval: Duration,
    pub max_concurrent_jobs: usize,
    /// Lookback used by jobs without their own override.
    pub default_lookback_hours: u32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&OrderSyncConfig::default())
    }
}

impl From<&OrderSyncConfig> for SchedulerOptions {
    fn from(cfg: &OrderSyncConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(cfg.scheduler.tick_interval_secs.max(1)),
            max_concurrent_jobs: cfg.scheduler.max_concurrent_jobs.max(1),
            default_lookback_hours: cfg.sync.default_lookback_hours.clamp(1, MAX_LOOKBACK_HOURS),
        }
    }
}

/// What happened to one job dispatched by a tick.
#[derive(Debug, Clone)]
pub struct JobRunOutcome {
    pub job_id: JobId,
    pub started_at: DateTime<Utc>,
    /// `Err` carries the message of a run that never reached any shop.
    pub result: Result<RunReport, String>,
    /// `false` when the job was removed while it ran.
    pub recorded: bool,
}

/// Handle to a tick whose jobs have been dispatched.
pub struct DispatchedTick {
    pub at: DateTime<Utc>,
    /// Due jobs in dispatch order.
    pub jobs: Vec<JobId>,
    handle: JoinHandle<Vec<JobRunOutcome>>,
}

impl DispatchedTick {
    /// Wait for every job of this tick to finish. Outcomes follow dispatch order.
    pub async fn wait(self) -> Vec<JobRunOutcome> {
        match self.handle.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!("tick task failed: {e}");
                Vec::new()
            }
        }
    }
}

/// Publish the run-level notifications for a finished (or failed) run.
///
/// A completion event is always emitted; an error event is added when the
/// run could not start or every shop in it failed.
pub fn publish_run_outcome(
    stats: &StatsTracker,
    job_id: Option<JobId>,
    result: &Result<RunReport, String>,
) {
    match result {
        Ok(report) => {
            stats.publish(SyncEvent::run_complete(report));
            if report.all_failed() {
                stats.publish(SyncEvent::Error {
                    job_id,
                    shop_id: None,
                    message: format!("all {} shop(s) failed", report.shops.len()),
                });
            }
        }
        Err(message) => {
            stats.publish(SyncEvent::Error {
                job_id: job_id.clone(),
                shop_id: None,
                message: message.clone(),
            });
            stats.publish(SyncEvent::run_failed(job_id));
        }
    }
}

/// Whether a tick is still handing out its jobs.
#[derive(Default)]
struct DispatchState {
    active: AtomicBool,
    idle: Notify,
}

impl DispatchState {
    fn try_begin(self: &Arc<Self>) -> Option<TickGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickGuard(self.clone()))
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if !self.is_active() {
                return;
            }
            idle.await;
        }
    }
}

/// Ends the dispatch phase when dropped, panics included.
struct TickGuard(Arc<DispatchState>);

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::Release);
        self.0.idle.notify_waiters();
    }
}

type RunningSet = Arc<Mutex<HashSet<JobId>>>;

/// Marks a job as running until dropped.
struct RunningJob {
    running: RunningSet,
    id: JobId,
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        self.running.lock().remove(&self.id);
    }
}

struct LoopCore {
    store: Arc<JobStore>,
    runner: Arc<SyncRunner>,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
    dispatch: Arc<DispatchState>,
    running: RunningSet,
    /// Shared by all ticks, so `max_concurrent_jobs` bounds runs overall.
    permits: Arc<Semaphore>,
}

impl LoopCore {
    /// Snapshot due jobs and spawn their dispatch. `None` if another tick is
    /// still dispatching. Jobs still running from an earlier tick are left out.
    fn begin_tick(self: &Arc<Self>) -> Option<DispatchedTick> {
        let guard = self.dispatch.try_begin()?;

        let now = self.clock.now();
        let calculator = *self.store.calculator();
        let mut due = Vec::new();
        {
            let mut running = self.running.lock();
            for job in self.store.list_jobs() {
                if !calculator.is_due(&job, now) {
                    continue;
                }
                if !running.insert(job.id.clone()) {
                    debug!(job_id = %job.id, "previous run still going, not dispatched");
                    continue;
                }
                let marker = RunningJob {
                    running: self.running.clone(),
                    id: job.id.clone(),
                };
                due.push((job, marker));
            }
        }
        let jobs: Vec<JobId> = due.iter().map(|(job, _)| job.id.clone()).collect();
        if !due.is_empty() {
            info!(count = due.len(), "dispatching due jobs");
        }

        let core = self.clone();
        let handle = tokio::spawn(core.run_tick(due, now, guard));
        Some(DispatchedTick { at: now, jobs, handle })
    }

    async fn run_tick(
        self: Arc<Self>,
        due: Vec<(ScheduledJob, RunningJob)>,
        now: DateTime<Utc>,
        guard: TickGuard,
    ) -> Vec<JobRunOutcome> {
        let mut set = JoinSet::new();
        for (index, (job, marker)) in due.into_iter().enumerate() {
            // Permits are taken in list order, so jobs start in order.
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let core = self.clone();
            set.spawn(async move {
                let _permit = permit;
                let _marker = marker;
                (index, core.run_job(job, now).await)
            });
        }
        // Every job has started; the next tick may dispatch while these run.
        drop(guard);

        let mut outcomes = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("job task failed: {e}"),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, o)| o).collect()
    }

    async fn run_job(&self, job: ScheduledJob, started_at: DateTime<Utc>) -> JobRunOutcome {
        let hours = job
            .lookback_hours
            .unwrap_or(self.options.default_lookback_hours);
        let request = RunRequest::new(ShopSelection::from_ids(&job.shop_ids), hours)
            .for_job(job.id.clone());
        info!(job_id = %job.id, name = %job.name, hours, "job run starting");

        let runner = self.runner.clone();
        let result = match tokio::spawn(async move { runner.run(request).await }).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("run panicked: {e}")),
        };
        if let Err(ref message) = result {
            warn!(job_id = %job.id, "job run failed: {message}");
        }

        // Failed attempts count as runs too.
        let recorded = self.store.record_run(&job.id, started_at);
        if recorded {
            let store = self.store.clone();
            match tokio::task::spawn_blocking(move || store.persist()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(job_id = %job.id, "job state not persisted: {e}"),
                Err(e) => warn!(job_id = %job.id, "persist task failed: {e}"),
            }
        } else {
            debug!(job_id = %job.id, "job removed during run, state not recorded");
        }

        publish_run_outcome(self.runner.stats(), Some(job.id.clone()), &result);
        JobRunOutcome {
            job_id: job.id,
            started_at,
            result,
            recorded,
        }
    }
}

struct LoopTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic due-check loop.
///
/// Each tick snapshots the job list and dispatches every enabled due job
/// that is not still running from an earlier tick; the runs proceed on
/// their own tasks. Dispatch ends once each job holds one of the
/// `max_concurrent_jobs` permits. A tick that fires while another is still
/// dispatching is skipped rather than queued.
pub struct SchedulerLoop {
    core: Arc<LoopCore>,
    task: Mutex<Option<LoopTask>>,
}

impl SchedulerLoop {
    pub fn new(
        store: Arc<JobStore>,
        runner: Arc<SyncRunner>,
        clock: Arc<dyn Clock>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            core: Arc::new(LoopCore {
                store,
                runner,
                clock,
                permits: Arc::new(Semaphore::new(options.max_concurrent_jobs.max(1))),
                options,
                dispatch: Arc::new(DispatchState::default()),
                running: Arc::new(Mutex::new(HashSet::new())),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start ticking. Returns `false` if the loop was already running.
    pub fn start(&self) -> bool {
        let mut slot = self.task.lock();
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("scheduler already running");
            return false;
        }
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(drive(self.core.clone(), shutdown.clone()));
        *slot = Some(LoopTask { shutdown, handle });
        info!(
            interval_secs = self.core.options.tick_interval.as_secs(),
            max_concurrent_jobs = self.core.options.max_concurrent_jobs,
            "scheduler started"
        );
        true
    }

    /// Stop ticking and wait for the loop task and any tick still
    /// dispatching. Runs already dispatched keep going. No-op when not running.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        task.shutdown.cancel();
        if let Err(e) = task.handle.await {
            error!("scheduler loop task failed: {e}");
        }
        self.core.dispatch.wait_idle().await;
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Whether a tick is still dispatching its jobs.
    pub fn tick_in_flight(&self) -> bool {
        self.core.dispatch.is_active()
    }

    /// Ids of jobs whose scheduled run has not finished yet.
    pub fn running_jobs(&self) -> Vec<JobId> {
        self.core.running.lock().iter().cloned().collect()
    }

    pub fn is_job_running(&self, id: &JobId) -> bool {
        self.core.running.lock().contains(id)
    }

    /// Run one tick now. `None` means another tick is still dispatching.
    pub fn tick(&self) -> Option<DispatchedTick> {
        self.core.begin_tick()
    }
}

async fn drive(core: Arc<LoopCore>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(core.options.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if core.begin_tick().is_none() {
                    debug!("previous tick still dispatching, skipping");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schedule::ScheduleCalculator,
        store::MemoryBackend,
        types::{JobDefinition, ScheduleKind},
    };
    use chrono::TimeZone;
    use ordersync_core::{ManualClock, ShopIdentity, ShopRegistry};
    use ordersync_runner::{
        memory::{MemorySource, MemoryTarget},
        SourceOrder,
    };

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<JobStore>,
        target: Arc<MemoryTarget>,
        stats: Arc<StatsTracker>,
        scheduler: SchedulerLoop,
    }

    fn shop(id: &str) -> ShopIdentity {
        let mut s = ShopIdentity::new(id);
        s.id = id.into();
        s
    }

    fn fixture(options: SchedulerOptions) -> Fixture {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let shops = Arc::new(ShopRegistry::new(
            vec![shop("s1"), shop("s2"), shop("s3")],
            0,
        ));
        let source = Arc::new(MemorySource::new());
        for id in ["s1", "s2", "s3"] {
            source.set_orders(
                id,
                vec![SourceOrder {
                    source_id: "1".into(),
                    order_number: "A-1".into(),
                    modified_at: now - chrono::Duration::hours(1),
                    customer_name: None,
                    payload: serde_json::Value::Null,
                }],
            );
        }
        let target = Arc::new(MemoryTarget::new());
        let stats = Arc::new(StatsTracker::new());
        let runner = Arc::new(SyncRunner::new(
            shops,
            source,
            target.clone(),
            stats.clone(),
            clock.clone(),
        ));
        let store = Arc::new(JobStore::new(
            Arc::new(MemoryBackend::new()),
            ScheduleCalculator::utc(),
            clock.clone(),
        ));
        let scheduler = SchedulerLoop::new(store.clone(), runner, clock.clone(), options);
        Fixture {
            clock,
            store,
            target,
            stats,
            scheduler,
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let f = fixture(SchedulerOptions::default());
        f.scheduler.stop().await;
        assert!(f.scheduler.start());
        assert!(!f.scheduler.start());
        assert!(f.scheduler.is_running());
        f.scheduler.stop().await;
        f.scheduler.stop().await;
        assert!(!f.scheduler.is_running());
        assert!(f.scheduler.start());
        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn tick_runs_due_job_and_records_it() {
        let f = fixture(SchedulerOptions::default());
        let id = f
            .store
            .add_job(JobDefinition::new("every5", ScheduleKind::every_minutes(5)).with_shops(["s1"]))
            .unwrap();
        let mut events = f.stats.subscribe();

        let tick = f.scheduler.tick().unwrap();
        assert_eq!(tick.jobs, vec![id.clone()]);
        let outcomes = tick.wait().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].recorded);
        assert_eq!(f.target.written("s1"), vec!["1".to_string()]);

        let job = f.store.get_job(&id).unwrap();
        assert_eq!(job.last_run_at, Some(f.clock.now()));

        let mut saw_complete = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::RunComplete { job_id, failed, .. } = event {
                assert_eq!(job_id, Some(id.clone()));
                assert!(!failed);
                saw_complete = true;
            }
        }
        assert!(saw_complete);

        // Not due again until the interval elapses.
        assert!(f.scheduler.tick().unwrap().wait().await.is_empty());
    }

    async fn until_dispatched(scheduler: &SchedulerLoop) {
        while scheduler.tick_in_flight() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn slow_job_does_not_block_jobs_on_other_shops() {
        let f = fixture(SchedulerOptions::default());
        f.target.set_write_delay(Duration::from_millis(200));
        let slow = f
            .store
            .add_job(JobDefinition::new("slow", ScheduleKind::every_minutes(1)).with_shops(["s1"]))
            .unwrap();

        let first = f.scheduler.tick().unwrap();
        until_dispatched(&f.scheduler).await;
        assert!(f.scheduler.is_job_running(&slow));

        let other = f
            .store
            .add_job(JobDefinition::new("other", ScheduleKind::every_minutes(1)).with_shops(["s2"]))
            .unwrap();
        f.clock.advance(chrono::Duration::minutes(1));

        // The slow job is due again but still running, so only the new one goes.
        let second = f.scheduler.tick().expect("tick skipped while a run was going");
        assert_eq!(second.jobs, vec![other.clone()]);
        assert!(f.scheduler.is_job_running(&slow));
        let outcomes = second.wait().await;
        assert!(outcomes[0].result.as_ref().unwrap().outcome(&"s2".into()).unwrap().is_completed());

        let outcomes = first.wait().await;
        assert_eq!(outcomes.len(), 1);
        assert!(f.scheduler.running_jobs().is_empty());
        assert_eq!(f.target.written("s1"), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn tick_waiting_for_permits_skips_overlapping_ticks() {
        let f = fixture(SchedulerOptions {
            max_concurrent_jobs: 1,
            ..SchedulerOptions::default()
        });
        f.target.set_write_delay(Duration::from_millis(100));
        for shop in ["s1", "s2"] {
            f.store
                .add_job(JobDefinition::new(shop, ScheduleKind::every_minutes(1)).with_shops([shop]))
                .unwrap();
        }

        let first = f.scheduler.tick().unwrap();
        tokio::task::yield_now().await;
        // The second job waits for the only permit, so dispatch is not over.
        assert!(f.scheduler.tick_in_flight());
        assert!(f.scheduler.tick().is_none());

        assert_eq!(first.wait().await.len(), 2);
        assert!(!f.scheduler.tick_in_flight());
        assert_eq!(f.target.peak_total(), 1);
        assert!(f.scheduler.tick().is_some());
    }

    #[tokio::test]
    async fn concurrent_job_runs_are_bounded() {
        let f = fixture(SchedulerOptions {
            max_concurrent_jobs: 2,
            ..SchedulerOptions::default()
        });
        f.target.set_write_delay(Duration::from_millis(50));
        for shop in ["s1", "s2", "s3"] {
            f.store
                .add_job(JobDefinition::new(shop, ScheduleKind::every_minutes(5)).with_shops([shop]))
                .unwrap();
        }

        let outcomes = f.scheduler.tick().unwrap().wait().await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.result.is_ok() && o.recorded));
        assert_eq!(f.target.peak_total(), 2);
        for shop in ["s1", "s2", "s3"] {
            assert_eq!(f.target.written(shop).len(), 1);
        }
    }

    #[tokio::test]
    async fn stop_waits_for_dispatch_only() {
        let f = fixture(SchedulerOptions {
            max_concurrent_jobs: 1,
            ..SchedulerOptions::default()
        });
        f.target.set_write_delay(Duration::from_millis(300));
        let id = f
            .store
            .add_job(JobDefinition::new("slow", ScheduleKind::every_minutes(5)).with_shops(["s1"]))
            .unwrap();

        assert!(f.scheduler.start());
        while !f.scheduler.is_job_running(&id) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        f.scheduler.stop().await;
        assert!(!f.scheduler.tick_in_flight());
        assert!(f.scheduler.is_job_running(&id));
    }

    #[tokio::test]
    async fn disabled_jobs_are_not_dispatched() {
        let f = fixture(SchedulerOptions::default());
        let id = f
            .store
            .add_job(JobDefinition::new("off", ScheduleKind::every_minutes(1)))
            .unwrap();
        f.store.toggle_enabled(&id).unwrap();
        let tick = f.scheduler.tick().unwrap();
        assert!(tick.jobs.is_empty());
        tick.wait().await;
        assert!(f.target.written("s1").is_empty());
    }

    #[tokio::test]
    async fn run_that_cannot_start_still_updates_last_run() {
        let f = fixture(SchedulerOptions::default());
        let id = f
            .store
            .add_job(JobDefinition::new("ghost", ScheduleKind::every_minutes(10)).with_shops(["nope"]))
            .unwrap();
        let mut events = f.stats.subscribe();

        let outcomes = f.scheduler.tick().unwrap().wait().await;
        assert!(outcomes[0].result.is_err());
        assert!(f.store.get_job(&id).unwrap().last_run_at.is_some());

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event);
        }
        assert!(kinds
            .iter()
            .any(|e| matches!(e, SyncEvent::RunComplete { failed: true, .. })));
        assert!(kinds
            .iter()
            .any(|e| matches!(e, SyncEvent::Error { shop_id: None, .. })));
    }

    #[test]
    fn options_from_config_clamp_zeroes() {
        let mut cfg = OrderSyncConfig::default();
        cfg.scheduler.tick_interval_secs = 0;
        cfg.scheduler.max_concurrent_jobs = 0;
        let options = SchedulerOptions::from(&cfg);
        assert_eq!(options.tick_interval, Duration::from_secs(1));
        assert_eq!(options.max_concurrent_jobs, 1);
        assert_eq!(options.default_lookback_hours, 24);

        cfg.sync.default_lookback_hours = u32::MAX;
        assert_eq!(
            SchedulerOptions::from(&cfg).default_lookback_hours,
            MAX_LOOKBACK_HOURS
        );
    }
}
