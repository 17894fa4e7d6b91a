use ordersync_core::{JobId, ShopId};
use serde::{Deserialize, Serialize};

use crate::types::{RunReport, SyncStats, SyncedOrder};

/// The three notification kinds consumers can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Progress,
    Complete,
    Error,
}

/// Notifications published while runs execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Best-effort mid-run counters for one shop.
    Progress { shop_id: ShopId, stats: SyncStats },
    /// One order was written to the target.
    OrderSynced {
        job_id: Option<JobId>,
        order: SyncedOrder,
    },
    /// One shop of a run finished (including aborted shops).
    ShopComplete {
        job_id: Option<JobId>,
        stats: SyncStats,
    },
    /// A whole run finished. Emitted even when every shop failed.
    RunComplete {
        job_id: Option<JobId>,
        shops: Vec<SyncStats>,
        aborted: bool,
        failed: bool,
    },
    /// A shop or a whole run failed.
    Error {
        job_id: Option<JobId>,
        shop_id: Option<ShopId>,
        message: String,
    },
}

impl SyncEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::Progress { .. } | SyncEvent::OrderSynced { .. } => EventKind::Progress,
            SyncEvent::ShopComplete { .. } | SyncEvent::RunComplete { .. } => EventKind::Complete,
            SyncEvent::Error { .. } => EventKind::Error,
        }
    }

    pub fn run_complete(report: &RunReport) -> Self {
        SyncEvent::RunComplete {
            job_id: report.job_id.clone(),
            shops: report.all_stats(),
            aborted: report.aborted,
            failed: report.all_failed(),
        }
    }

    /// Completion record for a run that never got to any shop.
    pub fn run_failed(job_id: Option<JobId>) -> Self {
        SyncEvent::RunComplete {
            job_id,
            shops: Vec::new(),
            aborted: false,
            failed: true,
        }
    }
}

/// Consumer of sync notifications (UI bridge, log mirror, ...).
///
/// Emitting is fire-and-forget: implementations must not block and the
/// runner never looks at whether delivery worked.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &SyncEvent);
}
