use chrono::{DateTime, TimeDelta, Utc};
use ordersync_core::{JobId, ShopId};
use serde::{Deserialize, Serialize};

/// A storefront order as handed over by a [`crate::SourceReader`].
///
/// Field mapping into the ERP's record shape is the target adapter's job;
/// the runner only needs the identity and the change timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOrder {
    /// Storefront-side primary key. Target existence checks are keyed by this.
    pub source_id: String,
    /// Human-facing order number, used in logs.
    pub order_number: String,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub customer_name: Option<String>,
    /// Remaining storefront fields, passed through untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Longest lookback window accepted anywhere, one leap year.
pub const MAX_LOOKBACK_HOURS: u32 = 366 * 24;

/// Time range of source records considered "changed" for one shop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookbackWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub hours: u32,
}

impl LookbackWindow {
    /// Window of `hours` ending at `until`. Starts at the earliest
    /// representable time when the subtraction would underflow.
    pub fn ending_at(until: DateTime<Utc>, hours: u32) -> Self {
        let since = TimeDelta::try_hours(i64::from(hours))
            .and_then(|span| until.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { since, until, hours }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.since && at <= self.until
    }
}

/// Counters for the most recent run of one shop.
///
/// A value is a snapshot of a single run; the next run replaces it rather
/// than adding to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub shop_id: ShopId,
    pub total: u32,
    pub synced: u32,
    pub skipped: u32,
    pub errored: u32,
    pub last_sync_time: DateTime<Utc>,
    /// Lookback window the run used.
    pub hours: u32,
    pub aborted: bool,
}

impl SyncStats {
    pub fn begin(shop_id: ShopId, total: usize, hours: u32, at: DateTime<Utc>) -> Self {
        Self {
            shop_id,
            total: u32::try_from(total).unwrap_or(u32::MAX),
            synced: 0,
            skipped: 0,
            errored: 0,
            last_sync_time: at,
            hours,
            aborted: false,
        }
    }

    pub fn processed(&self) -> u32 {
        self.synced + self.skipped + self.errored
    }
}

/// One order written to the target, kept in the per-shop history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedOrder {
    pub shop_id: ShopId,
    pub source_id: String,
    pub order_number: String,
    pub synced_at: DateTime<Utc>,
}

/// Which shops a run applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum ShopSelection {
    /// Every shop configured at the moment the run starts.
    All,
    /// An explicit id list. Duplicates are ignored.
    Only(Vec<ShopId>),
}

impl ShopSelection {
    /// An empty id list means "all shops", as stored on scheduled jobs.
    pub fn from_ids(ids: &[ShopId]) -> Self {
        if ids.is_empty() {
            ShopSelection::All
        } else {
            ShopSelection::Only(ids.to_vec())
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub selection: ShopSelection,
    pub lookback_hours: u32,
    /// Set when the run was dispatched for a scheduled job.
    pub job_id: Option<JobId>,
}

impl RunRequest {
    pub fn new(selection: ShopSelection, lookback_hours: u32) -> Self {
        Self {
            selection,
            lookback_hours,
            job_id: None,
        }
    }

    pub fn for_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/// What happened to one shop during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShopOutcome {
    /// The shop was processed (possibly with per-record errors, possibly aborted).
    Completed { stats: SyncStats },
    /// The shop could not be processed, e.g. its source or target was
    /// unreachable. `stats` holds the counts reached before the failure.
    Failed { stats: SyncStats, error: String },
    /// The id no longer resolves to a configured shop.
    NotFound { shop_id: ShopId },
}

impl ShopOutcome {
    pub fn shop_id(&self) -> &ShopId {
        match self {
            ShopOutcome::Completed { stats } | ShopOutcome::Failed { stats, .. } => &stats.shop_id,
            ShopOutcome::NotFound { shop_id } => shop_id,
        }
    }

    pub fn stats(&self) -> Option<&SyncStats> {
        match self {
            ShopOutcome::Completed { stats } | ShopOutcome::Failed { stats, .. } => Some(stats),
            ShopOutcome::NotFound { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ShopOutcome::Completed { .. })
    }
}

/// Result of one run across all of its shops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub job_id: Option<JobId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub lookback_hours: u32,
    pub shops: Vec<ShopOutcome>,
    /// True when an abort signal cut the run short. Shops not reached are absent.
    pub aborted: bool,
}

impl RunReport {
    pub fn outcome(&self, shop_id: &ShopId) -> Option<&ShopOutcome> {
        self.shops.iter().find(|o| o.shop_id() == shop_id)
    }

    pub fn stats_for(&self, shop_id: &ShopId) -> Option<&SyncStats> {
        self.outcome(shop_id).and_then(ShopOutcome::stats)
    }

    /// Stats of every shop that produced any.
    pub fn all_stats(&self) -> Vec<SyncStats> {
        self.shops
            .iter()
            .filter_map(ShopOutcome::stats)
            .cloned()
            .collect()
    }

    /// At least one shop failed or was missing.
    pub fn has_failures(&self) -> bool {
        self.shops.iter().any(|o| !o.is_completed())
    }

    /// Not a single shop completed.
    pub fn all_failed(&self) -> bool {
        !self.shops.is_empty() && self.shops.iter().all(|o| !o.is_completed())
    }

    pub fn failed_shops(&self) -> Vec<&ShopId> {
        self.shops
            .iter()
            .filter(|o| !o.is_completed())
            .map(ShopOutcome::shop_id)
            .collect()
    }
}
