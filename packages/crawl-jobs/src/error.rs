//! Error types for job scheduling and execution dispatch.

use thiserror::Error;
use uuid::Uuid;

/// Schedule validation failures, surfaced at job creation time.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unsupported cron expression: {0} (only numeric minute and hour with wildcard day fields are accepted)")]
    UnsupportedCron(String),

    #[error("schedule kind '{0}' requires a cron expression")]
    MissingCron(String),

    #[error("unknown schedule kind: {0}")]
    UnknownKind(String),
}

/// Job definition validation failures.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] listing_crawler::config::ConfigError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("invalid job definition: {0}")]
    Invalid(String),
}

/// Dispatch and store failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// An execution for this job is already running.
    #[error("job {job_id} already has a running execution")]
    Conflict { job_id: Uuid },

    /// Cancellation requested but nothing is running.
    #[error("job {job_id} has no running execution")]
    NotRunning { job_id: Uuid },

    #[error("job {job_id} not found")]
    NotFound { job_id: Uuid },

    #[error(transparent)]
    Invalid(#[from] JobError),

    #[error("job store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("task queue error: {0}")]
    Queue(#[source] anyhow::Error),
}

impl From<sqlx::Error> for DispatchError {
    fn from(e: sqlx::Error) -> Self {
        DispatchError::Store(e.into())
    }
}
