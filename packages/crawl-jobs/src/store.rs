//! Job and execution persistence.
//!
//! The dispatcher talks to storage through the `JobStore` trait so tests can
//! run against an in-memory store. The production implementation is
//! PostgreSQL-backed; `schema.sql` at the package root carries the DDL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::{Execution, ExecutionStatus, JobDefinition, JobStatus};

/// Terminal result applied to an execution and mirrored onto its job.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// `None` leaves the stored count untouched.
    pub items_discovered: Option<i64>,
    pub error_message: Option<String>,
    pub execution_log: Option<String>,
}

impl ExecutionOutcome {
    pub fn completed(items_discovered: i64, log: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            items_discovered: Some(items_discovered),
            error_message: None,
            execution_log: Some(log.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            items_discovered: None,
            error_message: Some(message.into()),
            execution_log: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            items_discovered: None,
            error_message: Some(message.into()),
            execution_log: None,
        }
    }
}

/// Storage seam for jobs and their executions.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &JobDefinition) -> Result<(), DispatchError>;

    async fn get_job(&self, job_id: Uuid) -> Result<JobDefinition, DispatchError>;

    /// Atomically open an execution: fails with `Conflict` if one is already
    /// running for this job, and flips the job to `running` in the same
    /// transaction as the execution insert.
    async fn begin_execution(&self, job_id: Uuid) -> Result<Execution, DispatchError>;

    /// Close an execution and mirror its terminal status onto the job.
    /// Only applies while the execution is still `running`; returns whether
    /// anything changed, so concurrent finishers are idempotent.
    async fn finish_execution(
        &self,
        execution_id: Uuid,
        outcome: ExecutionOutcome,
    ) -> Result<bool, DispatchError>;

    async fn set_task_handle(
        &self,
        execution_id: Uuid,
        handle: &str,
    ) -> Result<(), DispatchError>;

    async fn running_execution(&self, job_id: Uuid)
        -> Result<Option<Execution>, DispatchError>;

    async fn latest_execution(&self, job_id: Uuid)
        -> Result<Option<Execution>, DispatchError>;

    /// Most recent first.
    async fn list_executions(
        &self,
        job_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Execution>, DispatchError>;

    /// Scheduled jobs whose `next_run` has passed and that are not running.
    async fn find_due_jobs(&self, now: DateTime<Utc>)
        -> Result<Vec<JobDefinition>, DispatchError>;

    async fn set_next_run(
        &self,
        job_id: Uuid,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), DispatchError>;
}

/// PostgreSQL-backed store.
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<JobDefinition, DispatchError> {
    let status: String = row.try_get("status")?;
    let schedule: String = row.try_get("schedule")?;
    Ok(JobDefinition {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        spider: row.try_get("spider")?,
        start_urls: row.try_get("start_urls")?,
        status: status.parse().map_err(DispatchError::Store)?,
        schedule: schedule.parse().map_err(|e| DispatchError::Store(anyhow::Error::new(e)))?,
        cron_expression: row.try_get("cron_expression")?,
        config: row.try_get("config")?,
        next_run: row.try_get("next_run")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn execution_from_row(row: &PgRow) -> Result<Execution, DispatchError> {
    let status: String = row.try_get("status")?;
    Ok(Execution {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        status: status.parse().map_err(DispatchError::Store)?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        items_discovered: row.try_get("items_discovered")?,
        error_message: row.try_get("error_message")?,
        execution_log: row.try_get("execution_log")?,
        task_handle: row.try_get("task_handle")?,
    })
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert_job(&self, job: &JobDefinition) -> Result<(), DispatchError> {
        sqlx::query(
            r#"
            INSERT INTO crawl_jobs (
                id, name, spider, start_urls, status, schedule,
                cron_expression, config, next_run, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.spider)
        .bind(&job.start_urls)
        .bind(job.status.as_str())
        .bind(job.schedule.as_str())
        .bind(&job.cron_expression)
        .bind(&job.config)
        .bind(job.next_run)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<JobDefinition, DispatchError> {
        let row = sqlx::query("SELECT * FROM crawl_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DispatchError::NotFound { job_id })?;

        job_from_row(&row)
    }

    async fn begin_execution(&self, job_id: Uuid) -> Result<Execution, DispatchError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM crawl_jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DispatchError::NotFound { job_id })?;

        let running = sqlx::query(
            "SELECT 1 FROM crawl_executions WHERE job_id = $1 AND status = 'running' LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;
        if running.is_some() {
            return Err(DispatchError::Conflict { job_id });
        }

        sqlx::query("UPDATE crawl_jobs SET status = 'running', updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        let execution = Execution::begin(job_id);
        sqlx::query(
            r#"
            INSERT INTO crawl_executions (id, job_id, status, started_at, items_discovered)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(execution.id)
        .bind(execution.job_id)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.items_discovered)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(execution)
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        outcome: ExecutionOutcome,
    ) -> Result<bool, DispatchError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE crawl_executions
            SET status = $2,
                completed_at = NOW(),
                items_discovered = COALESCE($3, items_discovered),
                error_message = $4,
                execution_log = $5
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(execution_id)
        .bind(outcome.status.as_str())
        .bind(outcome.items_discovered)
        .bind(&outcome.error_message)
        .bind(&outcome.execution_log)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = $2, updated_at = NOW()
            WHERE id = (SELECT job_id FROM crawl_executions WHERE id = $1)
            "#,
        )
        .bind(execution_id)
        .bind(outcome.status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn set_task_handle(
        &self,
        execution_id: Uuid,
        handle: &str,
    ) -> Result<(), DispatchError> {
        sqlx::query("UPDATE crawl_executions SET task_handle = $2 WHERE id = $1")
            .bind(execution_id)
            .bind(handle)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn running_execution(
        &self,
        job_id: Uuid,
    ) -> Result<Option<Execution>, DispatchError> {
        let row = sqlx::query(
            "SELECT * FROM crawl_executions WHERE job_id = $1 AND status = 'running' LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn latest_execution(
        &self,
        job_id: Uuid,
    ) -> Result<Option<Execution>, DispatchError> {
        let row = sqlx::query(
            "SELECT * FROM crawl_executions WHERE job_id = $1 ORDER BY started_at DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_executions(
        &self,
        job_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Execution>, DispatchError> {
        let rows = sqlx::query(
            "SELECT * FROM crawl_executions WHERE job_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn find_due_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobDefinition>, DispatchError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM crawl_jobs
            WHERE schedule <> 'manual'
              AND status <> 'running'
              AND next_run IS NOT NULL
              AND next_run <= $1
            ORDER BY next_run
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn set_next_run(
        &self,
        job_id: Uuid,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), DispatchError> {
        sqlx::query("UPDATE crawl_jobs SET next_run = $2, updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .bind(next_run)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl From<ExecutionStatus> for JobStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Pending => JobStatus::Pending,
            ExecutionStatus::Running => JobStatus::Running,
            ExecutionStatus::Completed => JobStatus::Completed,
            ExecutionStatus::Failed => JobStatus::Failed,
            ExecutionStatus::Cancelled => JobStatus::Cancelled,
        }
    }
}
