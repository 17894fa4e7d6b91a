use std::{path::PathBuf, sync::Arc};

use anyhow::bail;
use ordersync_core::{config::OrderSyncConfig, Clock, ShopRegistry, SystemClock};
use ordersync_runner::{
    memory::MemoryTarget, RunnerOptions, StatsTracker, SyncRunner, TargetWriter,
};
use ordersync_scheduler::{
    JobFileLock, JobStore, JsonFileBackend, ScheduleCalculator, SchedulerError, SchedulerHandle,
    SchedulerOptions,
};
use tracing::info;

use crate::{sink::LogSink, source::FileSource, target::ErpTarget};

/// Everything the commands need, wired from config.
pub struct App {
    pub shops: Arc<ShopRegistry>,
    pub handle: SchedulerHandle,
    pub jobs_path: PathBuf,
}

impl App {
    /// Build the object graph and load stored jobs.
    ///
    /// With `dry_run` the ERP is replaced by an in-memory target, so runs
    /// read real exports but write nowhere.
    pub fn build(config: &OrderSyncConfig, dry_run: bool) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let shops = Arc::new(ShopRegistry::new(config.shops.clone(), config.current_shop));
        let source = Arc::new(FileSource::new(&config.source.export_dir));
        let target: Arc<dyn TargetWriter> = if dry_run {
            info!("dry run: orders will not be written to the ERP");
            Arc::new(MemoryTarget::new())
        } else {
            Arc::new(ErpTarget::new(&config.target)?)
        };

        let stats = Arc::new(StatsTracker::new());
        stats.add_sink(Arc::new(LogSink));

        let runner = Arc::new(
            SyncRunner::new(shops.clone(), source, target, stats, clock.clone())
                .with_options(RunnerOptions::from(&config.sync)),
        );
        let jobs_path = PathBuf::from(&config.storage.jobs_path);
        let store = Arc::new(JobStore::new(
            Arc::new(JsonFileBackend::new(&jobs_path)),
            ScheduleCalculator::with_offset_minutes(config.scheduler.utc_offset_minutes),
            clock.clone(),
        ));
        let handle = SchedulerHandle::new(store, runner, clock, SchedulerOptions::from(config));
        handle.load_jobs();

        Ok(Self {
            shops,
            handle,
            jobs_path,
        })
    }

    /// Take ownership of the jobs file and reload it, so changes saved by
    /// the previous owner are not overwritten. Refuses while another
    /// process holds it.
    pub fn claim_jobs(&self) -> anyhow::Result<JobFileLock> {
        let lock = match JobFileLock::try_acquire(&self.jobs_path) {
            Err(SchedulerError::Locked { path }) => bail!(
                "jobs file {} is in use by a running `ordersync run` (lock {path}); stop it first",
                self.jobs_path.display()
            ),
            other => other?,
        };
        self.handle.load_jobs();
        Ok(lock)
    }
}
