use ordersync_runner::SyncError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Bad clock time, interval or lookback.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// Writing the job list failed. In-memory state is still authoritative.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Another process owns the job file.
    #[error("Job file is locked by another process ({path})")]
    Locked { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::Persistence(_) => "PERSISTENCE_FAILURE",
            SchedulerError::Locked { .. } => "JOBS_LOCKED",
            SchedulerError::Io(_) => "IO_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::Sync(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
