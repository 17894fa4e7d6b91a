//! `ordersync-runner`: executes sync runs from storefront to ERP.
//!
//! A run resolves its shop selection against the live shop list, takes a
//! per-shop lock for each shop it touches, and for every changed order asks
//! the target whether it already exists before writing it. Results are
//! returned as a [`RunReport`] and recorded in the [`StatsTracker`], which
//! also fans out [`SyncEvent`] notifications.

pub mod adapters;
pub mod error;
pub mod events;
pub mod locks;
pub mod memory;
pub mod runner;
pub mod stats;
pub mod types;

pub use adapters::{SourceReader, TargetWriter};
pub use error::{Result, SyncError};
pub use events::{EventKind, NotificationSink, SyncEvent};
pub use locks::ShopLocks;
pub use runner::{RunnerOptions, SyncRunner};
pub use stats::{StatsTracker, SYNCED_HISTORY_LIMIT};
pub use types::{
    LookbackWindow, RunReport, RunRequest, ShopOutcome, ShopSelection, SourceOrder, SyncStats,
    SyncedOrder, MAX_LOOKBACK_HOURS,
};
