//! Periodic due-job sweep.
//!
//! Every minute the scheduler asks the store for jobs whose `next_run` has
//! passed, dispatches each one, and advances `next_run`. The advance happens
//! even when dispatch fails, so a wedged job does not get re-dispatched on
//! every sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::dispatcher::ExecutionDispatcher;
use crate::error::DispatchError;
use crate::schedule;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub due: usize,
    pub dispatched: usize,
    pub skipped: usize,
}

/// Dispatch everything due at `now` and advance each job's `next_run`.
pub async fn run_due_sweep(
    dispatcher: &ExecutionDispatcher,
    now: DateTime<Utc>,
) -> Result<SweepStats, DispatchError> {
    let due = dispatcher.store().find_due_jobs(now).await?;
    let mut stats = SweepStats {
        due: due.len(),
        ..Default::default()
    };

    if due.is_empty() {
        return Ok(stats);
    }
    info!(due = due.len(), "Due sweep found scheduled jobs");

    for job in due {
        match dispatcher.dispatch(job.id).await {
            Ok(execution) => {
                stats.dispatched += 1;
                info!(job_id = %job.id, execution_id = %execution.id, "Scheduled job dispatched");
            }
            Err(DispatchError::Conflict { .. }) => {
                stats.skipped += 1;
                warn!(job_id = %job.id, "Scheduled job already running, skipping");
            }
            Err(e) => {
                stats.skipped += 1;
                error!(job_id = %job.id, error = %e, "Scheduled dispatch failed");
            }
        }

        let next_run =
            schedule::compute_next_run(job.schedule, job.cron_expression.as_deref(), now);
        dispatcher.store().set_next_run(job.id, next_run).await?;
    }

    Ok(stats)
}

/// Start the minutely sweep on a tokio-cron-scheduler.
pub async fn start_scheduler(
    dispatcher: Arc<ExecutionDispatcher>,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sweep_job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
        let dispatcher = dispatcher.clone();
        Box::pin(async move {
            match run_due_sweep(&dispatcher, Utc::now()).await {
                Ok(stats) if stats.due > 0 => {
                    info!(
                        due = stats.due,
                        dispatched = stats.dispatched,
                        skipped = stats.skipped,
                        "Due sweep complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Due sweep failed"),
            }
        })
    })?;

    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    info!("Job scheduler started (due sweep every minute)");
    Ok(scheduler)
}
