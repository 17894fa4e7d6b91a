use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use ordersync_core::{Clock, JobId};
use ordersync_runner::MAX_LOOKBACK_HOURS;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    schedule::{validate, ScheduleCalculator},
    types::{JobDefinition, JobPatch, ScheduledJob},
};

/// Current job file schema version.
pub const JOB_FILE_VERSION: u32 = 1;

/// Durable storage for the job list.
pub trait JobBackend: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Vec<ScheduledJob>>>;

    /// Replace the stored list. Must be atomic: a crash mid-save leaves
    /// either the old or the new list, never a mix.
    fn save(&self, jobs: &[ScheduledJob]) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct JobFile {
    #[serde(rename = "v")]
    version: u32,
    jobs: Vec<ScheduledJob>,
}

#[derive(Serialize)]
struct JobFileRef<'a> {
    #[serde(rename = "v")]
    version: u32,
    jobs: &'a [ScheduledJob],
}

/// JSON file backend. Saves go to a sibling temp file that is then renamed
/// over the real one.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl JobBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<Vec<ScheduledJob>>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: JobFile = serde_json::from_str(&raw)?;
        if file.version > JOB_FILE_VERSION {
            return Err(SchedulerError::Persistence(format!(
                "job file version {} is newer than supported {}",
                file.version, JOB_FILE_VERSION
            )));
        }
        Ok(Some(file.jobs))
    }

    fn save(&self, jobs: &[ScheduledJob]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_vec_pretty(&JobFileRef {
            version: JOB_FILE_VERSION,
            jobs,
        })?;

        let tmp = self.tmp_path();
        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()
        })();
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        sync_dir(&parent_dir(&self.path))?;
        Ok(())
    }
}

/// Directory holding `path`; `.` for a bare file name.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Flush the directory entry so a completed rename survives power loss.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Exclusive ownership of a job file, held through an advisory lock on a
/// sibling `<file>.lock`.
///
/// A long-running scheduler holds it for its whole lifetime; one-shot job
/// edits take it briefly and fail fast while a scheduler owns the file, so
/// neither side overwrites jobs the other wrote. Released on drop.
#[derive(Debug)]
pub struct JobFileLock {
    file: File,
    path: PathBuf,
}

impl JobFileLock {
    /// Lock file used for the job file at `jobs_path`.
    pub fn lock_path(jobs_path: &Path) -> PathBuf {
        let mut name = jobs_path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        jobs_path.with_file_name(name)
    }

    /// Take the lock without waiting. Fails with [`SchedulerError::Locked`]
    /// when another holder has it.
    pub fn try_acquire(jobs_path: impl AsRef<Path>) -> Result<Self> {
        let path = Self::lock_path(jobs_path.as_ref());
        fs::create_dir_all(parent_dir(&path))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(SchedulerError::Locked {
                    path: path.display().to_string(),
                });
            }
            return Err(e.into());
        }

        // Record the owner now that we hold the lock.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "job file lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobFileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), "releasing job file lock failed: {e}");
        }
    }
}

/// Backend that keeps the "stored" list in memory. Saves can be made to fail.
#[derive(Default)]
pub struct MemoryBackend {
    stored: Mutex<Option<Vec<ScheduledJob>>>,
    fail_saves: Mutex<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<ScheduledJob>) -> Self {
        Self {
            stored: Mutex::new(Some(jobs)),
            fail_saves: Mutex::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock() = fail;
    }

    pub fn stored(&self) -> Option<Vec<ScheduledJob>> {
        self.stored.lock().clone()
    }
}

impl JobBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Vec<ScheduledJob>>> {
        Ok(self.stored.lock().clone())
    }

    fn save(&self, jobs: &[ScheduledJob]) -> Result<()> {
        if *self.fail_saves.lock() {
            return Err(SchedulerError::Persistence(
                "backend rejected write".to_string(),
            ));
        }
        *self.stored.lock() = Some(jobs.to_vec());
        Ok(())
    }
}

/// Result of [`JobStore::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub loaded: usize,
    /// Set when storage was missing or unreadable and the store started empty.
    pub warning: Option<String>,
}

/// Registry of scheduled jobs, kept in memory and written through a
/// [`JobBackend`].
///
/// The in-memory list is authoritative for the lifetime of the process; a
/// failed [`JobStore::persist`] is retried in full by the next one.
pub struct JobStore {
    jobs: Mutex<Vec<ScheduledJob>>,
    backend: Arc<dyn JobBackend>,
    calculator: ScheduleCalculator,
    clock: Arc<dyn Clock>,
    /// Serialises writers so saves land in the order they were requested.
    writer: Mutex<()>,
}

impl JobStore {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        calculator: ScheduleCalculator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            backend,
            calculator,
            clock,
            writer: Mutex::new(()),
        }
    }

    pub fn calculator(&self) -> &ScheduleCalculator {
        &self.calculator
    }

    /// Replace the in-memory list with what the backend holds.
    ///
    /// Never fails: missing or corrupt storage yields an empty list and a warning.
    pub fn load(&self) -> LoadOutcome {
        let (jobs, warning) = match self.backend.load() {
            Ok(Some(jobs)) => (jobs, None),
            Ok(None) => (Vec::new(), Some("no stored jobs found, starting empty".to_string())),
            Err(e) => (Vec::new(), Some(format!("stored jobs unreadable, starting empty: {e}"))),
        };
        if let Some(ref w) = warning {
            warn!("{w}");
        }

        let now = self.clock.now();
        let mut jobs = jobs;
        for job in jobs.iter_mut() {
            // Older files may lack next_run_at for enabled jobs.
            if job.enabled && job.next_run_at.is_none() {
                job.next_run_at = self.calculator.next_run_at(job, now);
            }
            if !job.enabled {
                job.next_run_at = None;
            }
        }

        let loaded = jobs.len();
        *self.jobs.lock() = jobs;
        info!(count = loaded, "jobs loaded");
        LoadOutcome { loaded, warning }
    }

    /// Write the current list to the backend.
    pub fn persist(&self) -> Result<()> {
        let _writer = self.writer.lock();
        let snapshot = self.jobs.lock().clone();
        self.backend.save(&snapshot).map_err(|e| match e {
            e @ SchedulerError::Persistence(_) => e,
            other => SchedulerError::Persistence(other.to_string()),
        })?;
        debug!(count = snapshot.len(), "jobs persisted");
        Ok(())
    }

    /// Add a job. It starts enabled, never run, with `next_run_at` computed.
    pub fn add_job(&self, definition: JobDefinition) -> Result<JobId> {
        validate(&definition.schedule)?;
        validate_lookback(definition.lookback_hours)?;

        let now = self.clock.now();
        let mut job = ScheduledJob {
            id: JobId::new(),
            name: definition.name,
            schedule: definition.schedule,
            enabled: true,
            shop_ids: definition.shop_ids,
            lookback_hours: definition.lookback_hours,
            last_run_at: None,
            next_run_at: None,
            created_at: now,
        };
        job.next_run_at = self.calculator.next_run_at(&job, now);

        let id = job.id.clone();
        info!(job_id = %id, name = %job.name, schedule = %job.schedule, "job added");
        self.jobs.lock().push(job);
        Ok(id)
    }

    pub fn update_job(&self, id: &JobId, patch: JobPatch) -> Result<ScheduledJob> {
        if let Some(ref schedule) = patch.schedule {
            validate(schedule)?;
        }
        if let Some(lookback) = patch.lookback_hours {
            validate_lookback(lookback)?;
        }

        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        let job = jobs
            .iter_mut()
            .find(|j| &j.id == id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;

        let reschedule = patch.affects_schedule();
        if let Some(name) = patch.name {
            job.name = name;
        }
        if let Some(schedule) = patch.schedule {
            job.schedule = schedule;
        }
        if let Some(enabled) = patch.enabled {
            job.enabled = enabled;
        }
        if let Some(shop_ids) = patch.shop_ids {
            job.shop_ids = shop_ids;
        }
        if let Some(lookback) = patch.lookback_hours {
            job.lookback_hours = lookback;
        }
        if reschedule {
            job.next_run_at = self.calculator.next_run_at(job, now);
        }

        info!(job_id = %id, "job updated");
        Ok(job.clone())
    }

    /// Remove a job. Returns whether it existed; removing an unknown id is a no-op.
    pub fn remove_job(&self, id: &JobId) -> bool {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|j| &j.id != id);
        let removed = jobs.len() < before;
        if removed {
            info!(job_id = %id, "job removed");
        }
        removed
    }

    /// Flip `enabled` and return the new value. The schedule itself is kept,
    /// so re-enabling brings back the same timing.
    pub fn toggle_enabled(&self, id: &JobId) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        let job = jobs
            .iter_mut()
            .find(|j| &j.id == id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        job.enabled = !job.enabled;
        job.next_run_at = self.calculator.next_run_at(job, now);
        info!(job_id = %id, enabled = job.enabled, "job toggled");
        Ok(job.enabled)
    }

    /// All jobs in insertion order.
    pub fn list_jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().clone()
    }

    pub fn get_job(&self, id: &JobId) -> Option<ScheduledJob> {
        self.jobs.lock().iter().find(|j| &j.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Record a run attempt that started at `started_at`.
    ///
    /// The next time is computed from the later of `started_at` and the
    /// current clock, so a long run does not immediately re-trigger a
    /// Daily or Hourly job. Returns `false` if the job was removed meanwhile.
    pub fn record_run(&self, id: &JobId, started_at: DateTime<Utc>) -> bool {
        let now = self.clock.now().max(started_at);
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.iter_mut().find(|j| &j.id == id) else {
            return false;
        };
        job.last_run_at = Some(started_at);
        job.next_run_at = self.calculator.next_run_at(job, now);
        true
    }
}

/// Lookback overrides must lie in `1..=MAX_LOOKBACK_HOURS`.
pub(crate) fn validate_lookback(hours: Option<u32>) -> Result<()> {
    match hours {
        Some(0) => Err(SchedulerError::InvalidSchedule(
            "lookback window must be at least one hour".to_string(),
        )),
        Some(h) if h > MAX_LOOKBACK_HOURS => Err(SchedulerError::InvalidSchedule(format!(
            "lookback of {h} hours exceeds the maximum of {MAX_LOOKBACK_HOURS}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schedule::MAX_INTERVAL_MINUTES, types::ScheduleKind};
    use chrono::{Duration, TimeZone};
    use ordersync_core::{ManualClock, ShopId};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 30, 0).unwrap()
    }

    fn store_with(backend: Arc<dyn JobBackend>) -> (JobStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        (
            JobStore::new(backend, ScheduleCalculator::utc(), clock.clone()),
            clock,
        )
    }

    fn memory_store() -> (JobStore, Arc<ManualClock>, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let (store, clock) = store_with(backend.clone());
        (store, clock, backend)
    }

    #[test]
    fn add_sets_defaults_and_next_run() {
        let (store, _, _) = memory_store();
        let id = store
            .add_job(JobDefinition::new("hourly", ScheduleKind::Hourly).with_shops(["s1"]))
            .unwrap();
        let job = store.get_job(&id).unwrap();
        assert!(job.enabled);
        assert!(job.last_run_at.is_none());
        assert_eq!(job.next_run_at, Some(start() + Duration::minutes(30)));
        assert_eq!(job.shop_ids, vec![ShopId::from("s1")]);
    }

    #[test]
    fn invalid_schedules_are_rejected_without_side_effects() {
        let (store, _, _) = memory_store();
        let err = store
            .add_job(JobDefinition::new("nightly", ScheduleKind::daily("25:00")))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        assert!(store
            .add_job(JobDefinition::new("fast", ScheduleKind::every_minutes(0)))
            .is_err());
        assert!(store
            .add_job(JobDefinition::new("zero", ScheduleKind::Hourly).with_lookback_hours(0))
            .is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn limits_are_enforced_on_add_and_update() {
        let (store, _, _) = memory_store();
        let longest = JobDefinition::new("yearly", ScheduleKind::every_minutes(MAX_INTERVAL_MINUTES))
            .with_lookback_hours(MAX_LOOKBACK_HOURS);
        let id = store.add_job(longest).unwrap();
        assert_eq!(
            store.get_job(&id).unwrap().next_run_at,
            Some(start() + Duration::minutes(MAX_INTERVAL_MINUTES))
        );

        for definition in [
            JobDefinition::new("overflow", ScheduleKind::every_minutes(i64::MAX)),
            JobDefinition::new("wide", ScheduleKind::Hourly).with_lookback_hours(u32::MAX),
            JobDefinition::new("wide", ScheduleKind::Hourly)
                .with_lookback_hours(MAX_LOOKBACK_HOURS + 1),
        ] {
            let err = store.add_job(definition).unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        }

        let patch = JobPatch {
            lookback_hours: Some(Some(u32::MAX)),
            ..Default::default()
        };
        assert!(store.update_job(&id, patch).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_keeps_insertion_order() {
        let (store, _, _) = memory_store();
        let names = ["c", "a", "b"];
        for n in names {
            store.add_job(JobDefinition::new(n, ScheduleKind::Hourly)).unwrap();
        }
        let listed: Vec<String> = store.list_jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(listed, names);
    }

    #[test]
    fn update_recomputes_only_for_schedule_changes() {
        let (store, clock, _) = memory_store();
        let id = store
            .add_job(JobDefinition::new("daily", ScheduleKind::daily("10:00")))
            .unwrap();
        let before = store.get_job(&id).unwrap().next_run_at;

        clock.advance(Duration::hours(2));
        let renamed = store
            .update_job(
                &id,
                JobPatch {
                    name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.next_run_at, before);

        let moved = store
            .update_job(
                &id,
                JobPatch {
                    schedule: Some(ScheduleKind::daily("12:00")),
                    ..Default::default()
                },
            )
            .unwrap();
        // 11:30 now, so 12:00 is still today.
        assert_eq!(
            moved.next_run_at,
            Some(Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn update_unknown_job_is_not_found() {
        let (store, _, _) = memory_store();
        let err = store
            .update_job(&JobId::from("nope"), JobPatch::default())
            .unwrap_err();
        assert_eq!(err.code(), "JOB_NOT_FOUND");
    }

    #[test]
    fn update_rejects_bad_schedule_and_keeps_old_one() {
        let (store, _, _) = memory_store();
        let id = store.add_job(JobDefinition::new("j", ScheduleKind::Hourly)).unwrap();
        let patch = JobPatch {
            schedule: Some(ScheduleKind::every_minutes(-1)),
            ..Default::default()
        };
        assert!(store.update_job(&id, patch).is_err());
        assert_eq!(store.get_job(&id).unwrap().schedule, ScheduleKind::Hourly);
    }

    #[test]
    fn remove_is_idempotent() {
        let (store, _, _) = memory_store();
        let id = store.add_job(JobDefinition::new("j", ScheduleKind::Hourly)).unwrap();
        assert!(store.remove_job(&id));
        assert!(!store.remove_job(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn toggle_clears_and_restores_next_run() {
        let (store, _, _) = memory_store();
        let id = store
            .add_job(JobDefinition::new("j", ScheduleKind::every_minutes(20)))
            .unwrap();

        assert!(!store.toggle_enabled(&id).unwrap());
        let job = store.get_job(&id).unwrap();
        assert!(job.next_run_at.is_none());
        assert_eq!(job.schedule, ScheduleKind::every_minutes(20));

        assert!(store.toggle_enabled(&id).unwrap());
        assert_eq!(
            store.get_job(&id).unwrap().next_run_at,
            Some(start() + Duration::minutes(20))
        );
    }

    #[test]
    fn record_run_on_removed_job_is_a_no_op() {
        let (store, _, _) = memory_store();
        assert!(!store.record_run(&JobId::from("gone"), start()));
    }

    #[test]
    fn record_run_anchors_interval_to_start() {
        let (store, clock, _) = memory_store();
        let id = store
            .add_job(JobDefinition::new("j", ScheduleKind::every_minutes(15)))
            .unwrap();
        clock.advance(Duration::minutes(4));
        assert!(store.record_run(&id, start()));
        let job = store.get_job(&id).unwrap();
        assert_eq!(job.last_run_at, Some(start()));
        assert_eq!(job.next_run_at, Some(start() + Duration::minutes(15)));
    }

    #[test]
    fn persist_and_reload_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.json");
        let backend = Arc::new(JsonFileBackend::new(&path));
        let (store, _) = store_with(backend.clone());
        store.add_job(JobDefinition::new("first", ScheduleKind::Hourly)).unwrap();
        store
            .add_job(JobDefinition::new("second", ScheduleKind::daily("03:00")))
            .unwrap();
        store.persist().unwrap();
        assert!(!dir.path().join("nested").join("jobs.json.tmp").exists());

        let (reloaded, _) = store_with(backend);
        let outcome = reloaded.load();
        assert_eq!(outcome, LoadOutcome { loaded: 2, warning: None });
        assert_eq!(reloaded.list_jobs(), store.list_jobs());
    }

    #[test]
    fn bare_file_name_syncs_the_current_directory() {
        assert_eq!(parent_dir(Path::new("jobs.json")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/var/lib/jobs.json")), PathBuf::from("/var/lib"));
        sync_dir(Path::new(".")).unwrap();
    }

    #[test]
    fn second_owner_of_a_job_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("jobs.json");

        let daemon = JobFileLock::try_acquire(&path).unwrap();
        assert_eq!(daemon.path(), dir.path().join("state").join("jobs.json.lock"));
        let err = JobFileLock::try_acquire(&path).unwrap_err();
        assert_eq!(err.code(), "JOBS_LOCKED");

        drop(daemon);
        JobFileLock::try_acquire(&path).unwrap();
    }

    #[test]
    fn two_stores_on_one_file_keep_each_others_jobs_when_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let open = || {
            let (store, _) = store_with(Arc::new(JsonFileBackend::new(&path)));
            store.load();
            store
        };

        // The long-running owner holds the lock and has a job of its own.
        let owner_lock = JobFileLock::try_acquire(&path).unwrap();
        let owner = open();
        owner.add_job(JobDefinition::new("owned", ScheduleKind::Hourly)).unwrap();
        owner.persist().unwrap();

        // An editor must not write while the owner runs.
        assert!(JobFileLock::try_acquire(&path).is_err());
        owner.persist().unwrap();
        drop(owner_lock);
        drop(owner);

        // Once released, the editor loads under the lock and appends.
        let _editor_lock = JobFileLock::try_acquire(&path).unwrap();
        let editor = open();
        editor.add_job(JobDefinition::new("edited", ScheduleKind::Hourly)).unwrap();
        editor.persist().unwrap();

        let names: Vec<String> = open().list_jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(names, ["owned", "edited"]);
    }

    #[test]
    fn missing_file_loads_empty_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_with(Arc::new(JsonFileBackend::new(dir.path().join("jobs.json"))));
        let outcome = store.load();
        assert_eq!(outcome.loaded, 0);
        assert!(outcome.warning.is_some());
    }

    #[test]
    fn corrupt_file_loads_empty_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        fs::write(&path, "{ not json").unwrap();
        let (store, _) = store_with(Arc::new(JsonFileBackend::new(&path)));
        let outcome = store.load();
        assert!(store.is_empty());
        assert!(outcome.warning.unwrap().contains("unreadable"));
    }

    #[test]
    fn failed_persist_keeps_memory_and_next_persist_writes_everything() {
        let (store, _, backend) = memory_store();
        backend.set_fail_saves(true);
        store.add_job(JobDefinition::new("a", ScheduleKind::Hourly)).unwrap();
        assert!(matches!(store.persist(), Err(SchedulerError::Persistence(_))));
        assert_eq!(store.len(), 1);

        store.add_job(JobDefinition::new("b", ScheduleKind::Hourly)).unwrap();
        backend.set_fail_saves(false);
        store.persist().unwrap();
        assert_eq!(backend.stored().unwrap().len(), 2);
    }

    #[test]
    fn load_clears_next_run_of_disabled_jobs() {
        let (seed, _, _) = memory_store();
        let id = seed.add_job(JobDefinition::new("j", ScheduleKind::Hourly)).unwrap();
        let mut jobs = seed.list_jobs();
        jobs[0].enabled = false;

        let (store, _) = store_with(Arc::new(MemoryBackend::with_jobs(jobs)));
        store.load();
        assert!(store.get_job(&id).unwrap().next_run_at.is_none());
    }
}
