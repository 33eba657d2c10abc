//! Task queue seam between dispatch and crawl execution.
//!
//! Dispatch only needs three capabilities from a queue: hand over a task and
//! get an opaque handle back, revoke by handle, and look up task state by
//! handle. The production queue runs crawls as tokio tasks in-process; tests
//! substitute recording fakes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::models::JobDefinition;

/// A unit of work handed to the queue: run one execution of one job.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub job: JobDefinition,
    pub execution_id: Uuid,
}

/// Queue-side view of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Revoked,
}

/// Runs one crawl task to completion, honoring the cancellation token.
#[async_trait]
pub trait CrawlExecutor: Send + Sync {
    async fn execute(&self, task: CrawlTask, cancel: CancellationToken) -> anyhow::Result<()>;
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a task; returns an opaque handle for revocation and lookup.
    async fn submit(&self, task: CrawlTask) -> anyhow::Result<String>;

    /// Request cancellation of a submitted task. Unknown handles are a no-op.
    async fn revoke(&self, handle: &str) -> anyhow::Result<()>;

    async fn state(&self, handle: &str) -> Option<TaskState>;
}

/// How long a terminal slot stays queryable before eviction.
const TERMINAL_RETENTION: Duration = Duration::from_secs(60 * 60);

struct TaskSlot {
    cancel: CancellationToken,
    state: TaskState,
    /// Set when the slot reaches a terminal state; drives eviction.
    finished_at: Option<Instant>,
}

impl TaskSlot {
    fn finish(&mut self, state: TaskState) {
        self.state = state;
        self.finished_at = Some(Instant::now());
    }
}

/// In-process queue: each task is a spawned tokio task with its own
/// cancellation token. Terminal slots are kept for a retention window so
/// status lookups keep working, then evicted on the next submission.
pub struct TokioTaskQueue {
    executor: Arc<dyn CrawlExecutor>,
    tasks: Arc<RwLock<HashMap<Uuid, TaskSlot>>>,
    retention: Duration,
}

impl TokioTaskQueue {
    pub fn new(executor: Arc<dyn CrawlExecutor>) -> Self {
        Self {
            executor,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            retention: TERMINAL_RETENTION,
        }
    }

    /// Override the terminal-slot retention window (tests).
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

#[async_trait]
impl TaskQueue for TokioTaskQueue {
    async fn submit(&self, task: CrawlTask) -> anyhow::Result<String> {
        let handle = Uuid::new_v4();
        let cancel = CancellationToken::new();

        {
            let mut tasks = self.tasks.write().await;
            let retention = self.retention;
            tasks.retain(|_, slot| {
                slot.finished_at
                    .map_or(true, |finished| finished.elapsed() < retention)
            });
            tasks.insert(
                handle,
                TaskSlot {
                    cancel: cancel.clone(),
                    state: TaskState::Pending,
                    finished_at: None,
                },
            );
        }

        let executor = Arc::clone(&self.executor);
        let tasks = Arc::clone(&self.tasks);
        let job_id = task.job.id;
        let execution_id = task.execution_id;

        tokio::spawn(async move {
            if let Some(slot) = tasks.write().await.get_mut(&handle) {
                slot.state = TaskState::Running;
            }

            let result = executor.execute(task, cancel).await;

            let mut tasks = tasks.write().await;
            if let Some(slot) = tasks.get_mut(&handle) {
                // A revoked slot keeps its state regardless of how the
                // executor returned.
                if slot.state != TaskState::Revoked {
                    let state = match &result {
                        Ok(()) => TaskState::Succeeded,
                        Err(e) => {
                            error!(
                                job_id = %job_id,
                                execution_id = %execution_id,
                                error = %e,
                                "Crawl task failed"
                            );
                            TaskState::Failed
                        }
                    };
                    slot.finish(state);
                }
            }
        });

        Ok(handle.to_string())
    }

    async fn revoke(&self, handle: &str) -> anyhow::Result<()> {
        let id: Uuid = handle.parse()?;
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&id) {
            Some(slot) => {
                slot.cancel.cancel();
                slot.finish(TaskState::Revoked);
            }
            None => debug!(handle, "Revoke for unknown task handle"),
        }
        Ok(())
    }

    async fn state(&self, handle: &str) -> Option<TaskState> {
        let id: Uuid = handle.parse().ok()?;
        self.tasks.read().await.get(&id).map(|slot| slot.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobDefinition, NewJob};
    use crate::schedule::ScheduleKind;
    use serde_json::json;
    use std::time::Duration;

    fn task() -> CrawlTask {
        let job = JobDefinition::create(NewJob {
            name: "test".into(),
            spider: "idealista".into(),
            start_urls: vec!["https://www.example.com/venta-viviendas/".into()],
            schedule: ScheduleKind::Manual,
            cron_expression: None,
            config: json!({
                "allowed_domain": "example.com",
                "target_url_pattern": "/venta-viviendas/"
            }),
        })
        .unwrap();
        CrawlTask {
            execution_id: Uuid::new_v4(),
            job,
        }
    }

    async fn wait_for_state(queue: &TokioTaskQueue, handle: &str, want: TaskState) {
        for _ in 0..100 {
            if queue.state(handle).await == Some(want) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached {want:?}, last state: {:?}", queue.state(handle).await);
    }

    struct ImmediateExecutor {
        result: fn() -> anyhow::Result<()>,
    }

    #[async_trait]
    impl CrawlExecutor for ImmediateExecutor {
        async fn execute(&self, _: CrawlTask, _: CancellationToken) -> anyhow::Result<()> {
            (self.result)()
        }
    }

    /// Blocks until its cancellation token fires.
    struct WaitingExecutor;

    #[async_trait]
    impl CrawlExecutor for WaitingExecutor {
        async fn execute(&self, _: CrawlTask, cancel: CancellationToken) -> anyhow::Result<()> {
            cancel.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn completed_task_reports_succeeded() {
        let queue = TokioTaskQueue::new(Arc::new(ImmediateExecutor { result: || Ok(()) }));
        let handle = queue.submit(task()).await.unwrap();
        wait_for_state(&queue, &handle, TaskState::Succeeded).await;
    }

    #[tokio::test]
    async fn failing_task_reports_failed() {
        let queue = TokioTaskQueue::new(Arc::new(ImmediateExecutor {
            result: || anyhow::bail!("boom"),
        }));
        let handle = queue.submit(task()).await.unwrap();
        wait_for_state(&queue, &handle, TaskState::Failed).await;
    }

    #[tokio::test]
    async fn revoke_cancels_the_token_and_pins_state() {
        let queue = TokioTaskQueue::new(Arc::new(WaitingExecutor));
        let handle = queue.submit(task()).await.unwrap();
        wait_for_state(&queue, &handle, TaskState::Running).await;

        queue.revoke(&handle).await.unwrap();
        assert_eq!(queue.state(&handle).await, Some(TaskState::Revoked));

        // The executor returning Ok after cancellation must not overwrite it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.state(&handle).await, Some(TaskState::Revoked));
    }

    #[tokio::test]
    async fn terminal_slots_are_evicted_after_the_retention_window() {
        let queue = TokioTaskQueue::new(Arc::new(ImmediateExecutor { result: || Ok(()) }))
            .with_retention(Duration::ZERO);

        let first = queue.submit(task()).await.unwrap();
        wait_for_state(&queue, &first, TaskState::Succeeded).await;

        // The next submission sweeps out expired terminal slots.
        let second = queue.submit(task()).await.unwrap();
        assert_eq!(queue.state(&first).await, None);
        wait_for_state(&queue, &second, TaskState::Succeeded).await;
    }

    #[tokio::test]
    async fn live_slots_survive_eviction_sweeps() {
        let queue = TokioTaskQueue::new(Arc::new(WaitingExecutor)).with_retention(Duration::ZERO);

        let running = queue.submit(task()).await.unwrap();
        wait_for_state(&queue, &running, TaskState::Running).await;

        // A running slot has no finish time and must not be swept.
        queue.submit(task()).await.unwrap();
        assert_eq!(queue.state(&running).await, Some(TaskState::Running));
    }

    #[tokio::test]
    async fn unknown_handles_are_tolerated() {
        let queue = TokioTaskQueue::new(Arc::new(WaitingExecutor));
        assert!(queue.revoke(&Uuid::new_v4().to_string()).await.is_ok());
        assert_eq!(queue.state(&Uuid::new_v4().to_string()).await, None);
        assert_eq!(queue.state("not-a-handle").await, None);
    }
}
