//! Execution dispatch: paired job/execution status writes plus task queue
//! submission, with at most one running execution per job.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::{Execution, JobDefinition, NewJob};
use crate::queue::{CrawlTask, TaskQueue, TaskState};
use crate::store::{ExecutionOutcome, JobStore};

/// Combined view for status queries.
#[derive(Debug, Clone)]
pub struct JobStatusReport {
    pub job: JobDefinition,
    pub latest_execution: Option<Execution>,
    /// Queue-side state of the latest execution's task, when known.
    pub task_state: Option<TaskState>,
}

/// Starts, cancels, and inspects crawl executions.
pub struct ExecutionDispatcher {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
}

impl ExecutionDispatcher {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Validate and persist a new job.
    pub async fn create_job(&self, input: NewJob) -> Result<JobDefinition, DispatchError> {
        let job = JobDefinition::create(input)?;
        self.store.insert_job(&job).await?;
        info!(job_id = %job.id, name = %job.name, schedule = %job.schedule, "Job created");
        Ok(job)
    }

    /// Start an execution for a job.
    ///
    /// Opening the execution is atomic in the store, so a second dispatch for
    /// the same job fails with `Conflict` and mutates nothing. If the queue
    /// rejects the task, the just-opened execution is closed as failed so the
    /// job does not stay running with nothing behind it.
    pub async fn dispatch(&self, job_id: Uuid) -> Result<Execution, DispatchError> {
        let mut execution = self.store.begin_execution(job_id).await?;
        let job = self.store.get_job(job_id).await?;

        let task = CrawlTask {
            job,
            execution_id: execution.id,
        };
        let handle = match self.queue.submit(task).await {
            Ok(handle) => handle,
            Err(e) => {
                let outcome = ExecutionOutcome::failed(format!("task submission failed: {e}"));
                if let Err(store_err) =
                    self.store.finish_execution(execution.id, outcome).await
                {
                    warn!(
                        execution_id = %execution.id,
                        error = %store_err,
                        "Failed to close execution after submission failure"
                    );
                }
                return Err(DispatchError::Queue(e));
            }
        };

        self.store.set_task_handle(execution.id, &handle).await?;
        execution.task_handle = Some(handle);

        info!(job_id = %job_id, execution_id = %execution.id, "Execution dispatched");
        Ok(execution)
    }

    /// Cancel the running execution of a job, if any.
    ///
    /// The queue revocation is best-effort; the paired cancelled writes go
    /// through regardless, and the worker's own terminal write is a no-op
    /// afterwards.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Execution, DispatchError> {
        let execution = self
            .store
            .running_execution(job_id)
            .await?
            .ok_or(DispatchError::NotRunning { job_id })?;

        if let Some(handle) = &execution.task_handle {
            if let Err(e) = self.queue.revoke(handle).await {
                warn!(
                    execution_id = %execution.id,
                    error = %e,
                    "Task revocation failed, marking cancelled anyway"
                );
            }
        }

        self.store
            .finish_execution(execution.id, ExecutionOutcome::cancelled("cancelled by user"))
            .await?;

        info!(job_id = %job_id, execution_id = %execution.id, "Execution cancelled");
        self.store
            .latest_execution(job_id)
            .await?
            .ok_or(DispatchError::NotRunning { job_id })
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusReport, DispatchError> {
        let job = self.store.get_job(job_id).await?;
        let latest_execution = self.store.latest_execution(job_id).await?;

        let task_state = match latest_execution.as_ref().and_then(|e| e.task_handle.as_deref()) {
            Some(handle) => self.queue.state(handle).await,
            None => None,
        };

        Ok(JobStatusReport {
            job,
            latest_execution,
            task_state,
        })
    }

    pub async fn list_executions(
        &self,
        job_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Execution>, DispatchError> {
        // Surface NotFound for unknown jobs rather than an empty history.
        self.store.get_job(job_id).await?;
        self.store.list_executions(job_id, limit).await
    }

    pub(crate) fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionStatus, JobStatus};
    use crate::schedule::ScheduleKind;
    use crate::testing::MemoryJobStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records submitted tasks; optionally refuses them.
    #[derive(Default)]
    struct FakeQueue {
        submitted: Mutex<Vec<Uuid>>,
        revoked: Mutex<Vec<String>>,
        fail_submit: bool,
    }

    #[async_trait]
    impl TaskQueue for FakeQueue {
        async fn submit(&self, task: CrawlTask) -> anyhow::Result<String> {
            if self.fail_submit {
                anyhow::bail!("queue unavailable");
            }
            self.submitted.lock().unwrap().push(task.execution_id);
            Ok(Uuid::new_v4().to_string())
        }

        async fn revoke(&self, handle: &str) -> anyhow::Result<()> {
            self.revoked.lock().unwrap().push(handle.to_string());
            Ok(())
        }

        async fn state(&self, _handle: &str) -> Option<TaskState> {
            Some(TaskState::Running)
        }
    }

    fn new_job() -> NewJob {
        NewJob {
            name: "idealista-madrid".into(),
            spider: "idealista".into(),
            start_urls: vec!["https://www.example.com/venta-viviendas/".into()],
            schedule: ScheduleKind::Manual,
            cron_expression: None,
            config: json!({
                "allowed_domain": "example.com",
                "target_url_pattern": "/venta-viviendas/"
            }),
        }
    }

    fn dispatcher() -> (ExecutionDispatcher, Arc<MemoryJobStore>, Arc<FakeQueue>) {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(FakeQueue::default());
        let dispatcher =
            ExecutionDispatcher::new(store.clone() as Arc<dyn JobStore>, queue.clone());
        (dispatcher, store, queue)
    }

    #[tokio::test]
    async fn dispatch_opens_running_execution_with_task_handle() {
        let (dispatcher, store, queue) = dispatcher();
        let job = dispatcher.create_job(new_job()).await.unwrap();

        let execution = dispatcher.dispatch(job.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.task_handle.is_some());
        assert_eq!(queue.submitted.lock().unwrap().as_slice(), &[execution.id]);

        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn second_dispatch_conflicts_and_mutates_nothing() {
        let (dispatcher, store, queue) = dispatcher();
        let job = dispatcher.create_job(new_job()).await.unwrap();
        dispatcher.dispatch(job.id).await.unwrap();

        let err = dispatcher.dispatch(job.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict { .. }));
        assert_eq!(store.executions().len(), 1);
        assert_eq!(queue.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_of_unknown_job_is_not_found() {
        let (dispatcher, _, _) = dispatcher();
        let err = dispatcher.dispatch(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn submission_failure_closes_the_execution_as_failed() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(FakeQueue {
            fail_submit: true,
            ..Default::default()
        });
        let dispatcher = ExecutionDispatcher::new(store.clone() as Arc<dyn JobStore>, queue);
        let job = dispatcher.create_job(new_job()).await.unwrap();

        let err = dispatcher.dispatch(job.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::Queue(_)));

        let executions = store.executions();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_revokes_and_writes_paired_cancelled_statuses() {
        let (dispatcher, store, queue) = dispatcher();
        let job = dispatcher.create_job(new_job()).await.unwrap();
        dispatcher.dispatch(job.id).await.unwrap();

        let cancelled = dispatcher.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert_eq!(cancelled.error_message.as_deref(), Some("cancelled by user"));
        assert_eq!(queue.revoked.lock().unwrap().len(), 1);
        assert_eq!(
            store.get_job(job.id).await.unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn cancel_without_running_execution_is_rejected() {
        let (dispatcher, _, queue) = dispatcher();
        let job = dispatcher.create_job(new_job()).await.unwrap();

        let err = dispatcher.cancel(job.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotRunning { .. }));
        assert!(queue.revoked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_combines_job_execution_and_task_state() {
        let (dispatcher, _, _) = dispatcher();
        let job = dispatcher.create_job(new_job()).await.unwrap();

        let report = dispatcher.get_status(job.id).await.unwrap();
        assert!(report.latest_execution.is_none());
        assert!(report.task_state.is_none());

        dispatcher.dispatch(job.id).await.unwrap();
        let report = dispatcher.get_status(job.id).await.unwrap();
        assert_eq!(
            report.latest_execution.unwrap().status,
            ExecutionStatus::Running
        );
        assert_eq!(report.task_state, Some(TaskState::Running));
    }

    #[tokio::test]
    async fn list_executions_is_most_recent_first_and_checks_the_job() {
        let (dispatcher, store, _) = dispatcher();
        let job = dispatcher.create_job(new_job()).await.unwrap();

        let first = dispatcher.dispatch(job.id).await.unwrap();
        store
            .finish_execution(first.id, ExecutionOutcome::completed(3, "finished"))
            .await
            .unwrap();
        let second = dispatcher.dispatch(job.id).await.unwrap();

        let executions = dispatcher.list_executions(job.id, 10).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].id, second.id);

        let err = dispatcher.list_executions(Uuid::new_v4(), 10).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { .. }));
    }
}
