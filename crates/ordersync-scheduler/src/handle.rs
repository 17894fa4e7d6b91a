use std::sync::Arc;

use chrono::{DateTime, Utc};
use ordersync_core::{Clock, JobId, ShopId};
use ordersync_runner::{
    NotificationSink, RunReport, RunRequest, ShopSelection, SyncError, SyncEvent, SyncRunner,
    SyncStats, SyncedOrder,
};
use tokio::sync::broadcast;
use tracing::warn;

use crate::{
    engine::{publish_run_outcome, SchedulerLoop, SchedulerOptions},
    error::{Result, SchedulerError},
    store::{validate_lookback, JobStore, LoadOutcome},
    types::{JobDefinition, JobPatch, ScheduledJob},
};

/// The API exposed to the command layer: job CRUD, loop control, ad-hoc runs,
/// stats and event subscription.
///
/// Job mutations are persisted right away; a failed save is logged and
/// retried by the next one.
pub struct SchedulerHandle {
    store: Arc<JobStore>,
    runner: Arc<SyncRunner>,
    scheduler: SchedulerLoop,
    default_lookback_hours: u32,
}

impl SchedulerHandle {
    pub fn new(
        store: Arc<JobStore>,
        runner: Arc<SyncRunner>,
        clock: Arc<dyn Clock>,
        options: SchedulerOptions,
    ) -> Self {
        let default_lookback_hours = options.default_lookback_hours;
        let scheduler = SchedulerLoop::new(store.clone(), runner.clone(), clock, options);
        Self {
            store,
            runner,
            scheduler,
            default_lookback_hours,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn runner(&self) -> &Arc<SyncRunner> {
        &self.runner
    }

    pub fn scheduler(&self) -> &SchedulerLoop {
        &self.scheduler
    }

    pub fn load_jobs(&self) -> LoadOutcome {
        self.store.load()
    }

    // ----- loop control -----

    pub fn start_scheduler(&self) -> bool {
        self.scheduler.start()
    }

    pub async fn stop_scheduler(&self) {
        self.scheduler.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    // ----- jobs -----

    pub fn add_job(&self, definition: JobDefinition) -> Result<JobId> {
        let id = self.store.add_job(definition)?;
        self.persist_quietly();
        Ok(id)
    }

    pub fn update_job(&self, id: &JobId, patch: JobPatch) -> Result<ScheduledJob> {
        let job = self.store.update_job(id, patch)?;
        self.persist_quietly();
        Ok(job)
    }

    pub fn remove_job(&self, id: &JobId) -> bool {
        let removed = self.store.remove_job(id);
        if removed {
            self.persist_quietly();
        }
        removed
    }

    pub fn toggle_enabled(&self, id: &JobId) -> Result<bool> {
        let enabled = self.store.toggle_enabled(id)?;
        self.persist_quietly();
        Ok(enabled)
    }

    pub fn list_jobs(&self) -> Vec<ScheduledJob> {
        self.store.list_jobs()
    }

    pub fn get_job(&self, id: &JobId) -> Option<ScheduledJob> {
        self.store.get_job(id)
    }

    /// Earliest `next_run_at` among enabled jobs.
    pub fn next_scheduled_run(&self) -> Option<DateTime<Utc>> {
        self.store
            .list_jobs()
            .iter()
            .filter(|job| job.enabled)
            .filter_map(|job| job.next_run_at)
            .min()
    }

    /// Write the job list now, surfacing any failure.
    pub fn persist(&self) -> Result<()> {
        self.store.persist()
    }

    fn persist_quietly(&self) {
        if let Err(e) = self.store.persist() {
            warn!("job change kept in memory only: {e}");
        }
    }

    // ----- runs -----

    /// Sync `shop_ids` right away, outside any schedule. Per-shop locking
    /// still applies, so this waits for scheduled runs on the same shops.
    pub async fn trigger_run_now(
        &self,
        shop_ids: Vec<ShopId>,
        lookback_hours: Option<u32>,
    ) -> Result<RunReport> {
        if shop_ids.is_empty() {
            return Err(SyncError::NoShopsSelected.into());
        }
        validate_lookback(lookback_hours)?;
        let hours = lookback_hours.unwrap_or(self.default_lookback_hours);

        let request = RunRequest::new(ShopSelection::Only(shop_ids), hours);
        let result = self.runner.run(request).await;
        let published = result.as_ref().cloned().map_err(|e| e.to_string());
        publish_run_outcome(self.runner.stats(), None, &published);
        result.map_err(SchedulerError::from)
    }

    /// Abort every run in flight, scheduled or manual.
    pub fn abort_runs(&self) {
        self.runner.abort_all();
    }

    // ----- stats and events -----

    /// `None` means the shop has never been synced, as opposed to a run with all zeroes.
    pub fn get_stats(&self, shop_id: &ShopId) -> Option<SyncStats> {
        self.runner.stats().get_stats(shop_id)
    }

    pub fn all_stats(&self) -> Vec<SyncStats> {
        self.runner.stats().all_stats()
    }

    /// Orders written for `shop_id` by this process, oldest first.
    pub fn synced_orders(&self, shop_id: &ShopId) -> Vec<SyncedOrder> {
        self.runner.stats().synced_orders(shop_id)
    }

    pub fn reset_stats(&self, shop_id: &ShopId) {
        self.runner.stats().reset(shop_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.runner.stats().subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.runner.stats().add_sink(sink)
    }
}
