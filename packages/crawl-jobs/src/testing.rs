//! In-memory test doubles for the storage seam.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::{Execution, ExecutionStatus, JobDefinition, JobStatus};
use crate::store::{ExecutionOutcome, JobStore};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, JobDefinition>,
    executions: Vec<Execution>,
}

/// HashMap-backed `JobStore` with the same conflict and paired-write
/// semantics as the PostgreSQL implementation.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All executions ever opened, oldest first. Test-inspection helper.
    pub fn executions(&self) -> Vec<Execution> {
        self.inner.lock().unwrap().executions.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: &JobDefinition) -> Result<(), DispatchError> {
        self.inner.lock().unwrap().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<JobDefinition, DispatchError> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(DispatchError::NotFound { job_id })
    }

    async fn begin_execution(&self, job_id: Uuid) -> Result<Execution, DispatchError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.jobs.contains_key(&job_id) {
            return Err(DispatchError::NotFound { job_id });
        }
        let already_running = inner
            .executions
            .iter()
            .any(|e| e.job_id == job_id && e.status == ExecutionStatus::Running);
        if already_running {
            return Err(DispatchError::Conflict { job_id });
        }

        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = JobStatus::Running;
            job.updated_at = Utc::now();
        }
        let execution = Execution::begin(job_id);
        inner.executions.push(execution.clone());
        Ok(execution)
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        outcome: ExecutionOutcome,
    ) -> Result<bool, DispatchError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(execution) = inner
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id && e.status == ExecutionStatus::Running)
        else {
            return Ok(false);
        };

        execution.status = outcome.status;
        execution.completed_at = Some(Utc::now());
        if let Some(items) = outcome.items_discovered {
            execution.items_discovered = items;
        }
        execution.error_message = outcome.error_message;
        execution.execution_log = outcome.execution_log;
        let job_id = execution.job_id;

        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = outcome.status.into();
            job.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn set_task_handle(
        &self,
        execution_id: Uuid,
        handle: &str,
    ) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(execution) = inner.executions.iter_mut().find(|e| e.id == execution_id) {
            execution.task_handle = Some(handle.to_string());
        }
        Ok(())
    }

    async fn running_execution(
        &self,
        job_id: Uuid,
    ) -> Result<Option<Execution>, DispatchError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .executions
            .iter()
            .find(|e| e.job_id == job_id && e.status == ExecutionStatus::Running)
            .cloned())
    }

    async fn latest_execution(
        &self,
        job_id: Uuid,
    ) -> Result<Option<Execution>, DispatchError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .executions
            .iter()
            .filter(|e| e.job_id == job_id)
            .max_by_key(|e| e.started_at)
            .cloned())
    }

    async fn list_executions(
        &self,
        job_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Execution>, DispatchError> {
        let inner = self.inner.lock().unwrap();
        let mut executions: Vec<Execution> = inner
            .executions
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit.max(0) as usize);
        Ok(executions)
    }

    async fn find_due_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobDefinition>, DispatchError> {
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<JobDefinition> = inner
            .jobs
            .values()
            .filter(|job| {
                job.schedule != crate::schedule::ScheduleKind::Manual
                    && job.status != JobStatus::Running
                    && job.next_run.map(|t| t <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|job| job.next_run);
        Ok(due)
    }

    async fn set_next_run(
        &self,
        job_id: Uuid,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.next_run = next_run;
            job.updated_at = Utc::now();
        }
        Ok(())
    }
}
