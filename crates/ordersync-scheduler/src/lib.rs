//! `ordersync-scheduler`: recurring sync jobs on top of `ordersync-runner`.
//!
//! # Overview
//!
//! Job definitions live in a [`JobStore`], persisted as JSON through a
//! [`JobBackend`] with atomic replace. The [`SchedulerLoop`] ticks on a fixed
//! interval, asks the [`ScheduleCalculator`] which enabled jobs are due and
//! dispatches their runs, bounded by `max_concurrent_jobs`. Runs touching the
//! same shop are serialised by the runner's per-shop lock.
//!
//! # Schedule variants
//!
//! | Variant         | Due when                                        |
//! |-----------------|-------------------------------------------------|
//! | `Daily`         | stored `next_run_at` (HH:MM, tomorrow if passed) has arrived |
//! | `Hourly`        | stored `next_run_at` (next top of the hour) has arrived |
//! | `EveryNMinutes` | never run, or N minutes elapsed since `last_run_at` |
//!
//! [`SchedulerHandle`] bundles all of this behind the API the command layer uses.

pub mod engine;
pub mod error;
pub mod handle;
pub mod schedule;
pub mod store;
pub mod types;

pub use engine::{DispatchedTick, JobRunOutcome, SchedulerLoop, SchedulerOptions};
pub use error::{Result, SchedulerError};
pub use handle::SchedulerHandle;
pub use schedule::{ScheduleCalculator, MAX_INTERVAL_MINUTES};
pub use store::{JobBackend, JobFileLock, JobStore, JsonFileBackend, LoadOutcome, MemoryBackend};
pub use types::{JobDefinition, JobPatch, ScheduleKind, ScheduledJob};
