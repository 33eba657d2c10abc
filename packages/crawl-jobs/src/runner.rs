//! Bridges the task queue to the crawl worker.
//!
//! One `execute` call is one crawl run: build the worker from the job row,
//! consume its event stream, enforce the wall-clock budget, and close the
//! execution with the paired terminal status the run earned.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use listing_crawler::{
    CheckpointStore, CrawlEvent, CrawlOutcome, CrawlWorker, PageFetcher, SpiderConfig,
    TerminationReason,
};

use crate::models::ExecutionStatus;
use crate::queue::{CrawlExecutor, CrawlTask};
use crate::store::{ExecutionOutcome, JobStore};

/// Wall-clock budget per execution.
const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

const EVENT_BUFFER: usize = 256;

pub struct ExecutionRunner {
    store: Arc<dyn JobStore>,
    fetcher: Arc<dyn PageFetcher>,
    checkpoint_root: PathBuf,
    timeout: Duration,
}

impl ExecutionRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        fetcher: Arc<dyn PageFetcher>,
        checkpoint_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            fetcher,
            checkpoint_root: checkpoint_root.into(),
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    /// Override the per-execution wall-clock budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn close(&self, task: &CrawlTask, outcome: ExecutionOutcome) {
        match self.store.finish_execution(task.execution_id, outcome).await {
            Ok(true) => {}
            // Someone else (a cancel) already closed it; that write wins.
            Ok(false) => debug!(
                execution_id = %task.execution_id,
                "Execution already closed, keeping existing terminal status"
            ),
            Err(e) => warn!(
                execution_id = %task.execution_id,
                error = %e,
                "Failed to close execution"
            ),
        }
    }
}

#[async_trait]
impl CrawlExecutor for ExecutionRunner {
    async fn execute(&self, task: CrawlTask, cancel: CancellationToken) -> anyhow::Result<()> {
        let config = match SpiderConfig::from_value(task.job.config.clone()) {
            Ok(config) => config,
            Err(e) => {
                self.close(&task, ExecutionOutcome::failed(format!("invalid spider config: {e}")))
                    .await;
                return Err(e.into());
            }
        };

        let start_urls: Result<Vec<Url>, _> =
            task.job.start_urls.iter().map(|u| Url::parse(u)).collect();
        let start_urls = match start_urls {
            Ok(urls) => urls,
            Err(e) => {
                self.close(&task, ExecutionOutcome::failed(format!("invalid start URL: {e}")))
                    .await;
                return Err(e.into());
            }
        };

        let checkpoints = CheckpointStore::new(&self.checkpoint_root, &task.job.id.to_string())
            .with_staleness(chrono::Duration::days(config.staleness_days));
        let (tx, mut rx) = mpsc::channel::<CrawlEvent>(EVENT_BUFFER);

        // Count discoveries off the event stream while the worker runs. This
        // is where a persistence pipeline would hang off the same channel.
        let job_id = task.job.id;
        let consumer = tokio::spawn(async move {
            let mut items: i64 = 0;
            while let Some(event) = rx.recv().await {
                match event {
                    CrawlEvent::RecordDiscovered { url, .. } => {
                        items += 1;
                        debug!(job_id = %job_id, url = %url, "Listing discovered");
                    }
                    CrawlEvent::PageVisited { pages_processed, .. } => {
                        if pages_processed % 100 == 0 {
                            debug!(job_id = %job_id, pages_processed, "Crawl progress");
                        }
                    }
                }
            }
            items
        });

        let worker = CrawlWorker::new(
            Arc::clone(&self.fetcher),
            config,
            checkpoints,
            start_urls,
            tx,
        );

        let child = cancel.child_token();
        let mut crawl = tokio::spawn(worker.run(child.clone()));

        let joined = match tokio::time::timeout(self.timeout, &mut crawl).await {
            Ok(joined) => joined,
            Err(_) => {
                // Budget spent: stop the worker so it persists a resumable
                // checkpoint, then mark the execution failed.
                warn!(
                    execution_id = %task.execution_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Execution exceeded its time budget, interrupting"
                );
                child.cancel();
                let _ = crawl.await;
                let _ = consumer.await;
                let message =
                    format!("execution timed out after {}s", self.timeout.as_secs());
                self.close(&task, ExecutionOutcome::failed(message.clone())).await;
                anyhow::bail!(message);
            }
        };

        let outcome: CrawlOutcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                let _ = consumer.await;
                self.close(&task, ExecutionOutcome::failed(e.to_string())).await;
                return Err(e);
            }
            Err(join_err) => {
                let _ = consumer.await;
                let message = format!("crawl task aborted: {join_err}");
                self.close(&task, ExecutionOutcome::failed(message.clone())).await;
                anyhow::bail!(message);
            }
        };

        // The worker dropped its sender, so the consumer drains and returns.
        let items = consumer.await.unwrap_or(0);

        let summary = format!(
            "{:?}: {} pages processed, {} listings discovered",
            outcome.reason, outcome.pages_processed, outcome.records_discovered
        );
        info!(
            execution_id = %task.execution_id,
            reason = ?outcome.reason,
            pages_processed = outcome.pages_processed,
            items,
            "Crawl run ended"
        );

        let terminal = match outcome.reason {
            TerminationReason::Finished | TerminationReason::QuotaExhausted => {
                ExecutionOutcome::completed(items, summary)
            }
            TerminationReason::UserInterrupt
            | TerminationReason::Shutdown
            | TerminationReason::Other => ExecutionOutcome {
                status: ExecutionStatus::Cancelled,
                items_discovered: Some(items),
                error_message: None,
                execution_log: Some(summary),
            },
        };
        self.close(&task, terminal).await;
        Ok(())
    }
}
