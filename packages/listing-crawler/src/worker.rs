//! The crawl worker state machine.
//!
//! One worker owns one linear traversal: a BFS frontier of not-yet-visited
//! URLs and a seen-set guarding against re-enqueueing. The run moves through
//! the phases fresh_start/resuming → running → checkpointing → terminating;
//! phase transitions are logged, and every phase but `running` touches the
//! checkpoint store.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::checkpoint::{CheckpointState, CheckpointStore, TerminationReason};
use crate::config::SpiderConfig;
use crate::events::{content_hash, CrawlEvent};
use crate::fetch::PageFetcher;
use crate::filters::{self, LinkClass};

/// Structured result of one crawl run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub pages_processed: u64,
    pub records_discovered: u64,
    pub reason: TerminationReason,
}

/// Worker phases, logged at transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    FreshStart,
    Resuming,
    Running,
    Checkpointing,
    Terminating,
}

/// A resumable traversal over one listing portal.
pub struct CrawlWorker {
    fetcher: Arc<dyn PageFetcher>,
    config: SpiderConfig,
    checkpoints: CheckpointStore,
    start_urls: Vec<Url>,
    events: mpsc::Sender<CrawlEvent>,
    /// Reason recorded when the cancellation token fires.
    interrupt_reason: TerminationReason,
}

impl CrawlWorker {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        config: SpiderConfig,
        checkpoints: CheckpointStore,
        start_urls: Vec<Url>,
        events: mpsc::Sender<CrawlEvent>,
    ) -> Self {
        Self {
            fetcher,
            config,
            checkpoints,
            start_urls,
            events,
            interrupt_reason: TerminationReason::UserInterrupt,
        }
    }

    /// Record a different reason when the token fires (e.g. process shutdown).
    pub fn with_interrupt_reason(mut self, reason: TerminationReason) -> Self {
        self.interrupt_reason = reason;
        self
    }

    /// Run the traversal to completion or interruption.
    ///
    /// Individual fetch failures drop the URL and continue; only cancellation,
    /// the page quota, or frontier exhaustion end the run. Checkpoint write
    /// failures are logged and swallowed.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<CrawlOutcome> {
        let resume = match self.checkpoints.load().await {
            Ok(resume) => resume,
            Err(e) => {
                warn!(error = %e, "Failed to read checkpoint, starting fresh");
                None
            }
        };

        let (mut frontier, mut processed, mut last_url, started_at) = match resume {
            Some(state) => {
                info!(
                    phase = ?Phase::Resuming,
                    pages_processed = state.pages_processed,
                    pending = state.frontier.len(),
                    "Resuming crawl from checkpoint"
                );
                let frontier: VecDeque<String> = state.frontier.into();
                (frontier, state.pages_processed, state.last_url, state.started_at)
            }
            None => {
                info!(
                    phase = ?Phase::FreshStart,
                    start_urls = self.start_urls.len(),
                    "Starting fresh crawl"
                );
                if let Err(e) = self.checkpoints.clear().await {
                    warn!(error = %e, "Failed to clear leftover checkpoint artifacts");
                }
                let frontier: VecDeque<String> =
                    self.start_urls.iter().map(|u| u.to_string()).collect();
                (frontier, 0, None, Utc::now())
            }
        };

        let mut seen: HashSet<String> = frontier.iter().cloned().collect();
        let mut records: u64 = 0;
        let mut reason: Option<TerminationReason> = None;

        debug!(phase = ?Phase::Running, "Traversal started");

        'crawl: while let Some(current) = frontier.pop_front() {
            if cancel.is_cancelled() {
                frontier.push_front(current);
                reason = Some(self.interrupt_reason);
                break;
            }

            if let Some(limit) = self.config.page_limit {
                if processed >= limit {
                    frontier.push_front(current);
                    reason = Some(TerminationReason::QuotaExhausted);
                    break;
                }
            }

            let url = match Url::parse(&current) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %current, error = %e, "Dropping unparseable frontier entry");
                    continue;
                }
            };

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    frontier.push_front(current);
                    reason = Some(self.interrupt_reason);
                    break 'crawl;
                }
                result = self.fetcher.fetch(&url) => match result {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Fetch failed, dropping URL");
                        continue;
                    }
                }
            };

            processed += 1;
            last_url = Some(current);
            let source_hash = content_hash(&page.body);

            self.emit(CrawlEvent::PageVisited {
                url: url.clone(),
                pages_processed: processed,
            })
            .await;

            for link in extract_links(&page.body, &url) {
                match filters::classify(&link, &self.config) {
                    LinkClass::Skip => {}
                    LinkClass::Follow => {
                        if seen.insert(link.to_string()) {
                            frontier.push_back(link.to_string());
                        }
                    }
                    LinkClass::Record => {
                        records += 1;
                        self.emit(CrawlEvent::RecordDiscovered {
                            url: link.clone(),
                            source_hash: source_hash.clone(),
                            discovered_at: Utc::now(),
                        })
                        .await;
                        if seen.insert(link.to_string()) {
                            frontier.push_back(link.to_string());
                        }
                    }
                }
            }

            if processed % self.config.checkpoint_interval == 0 {
                debug!(phase = ?Phase::Checkpointing, pages_processed = processed, "Writing periodic checkpoint");
                self.checkpoint_running(processed, &last_url, started_at, &frontier)
                    .await;
            }
        }

        let reason = reason.unwrap_or(TerminationReason::Finished);
        info!(
            phase = ?Phase::Terminating,
            ?reason,
            pages_processed = processed,
            records_discovered = records,
            pending = frontier.len(),
            "Crawl terminating"
        );

        let final_state =
            CheckpointState::terminal(processed, last_url.clone(), reason, started_at);
        if reason == TerminationReason::Finished {
            // Clean slate for the next run: record the finish, then drop
            // every artifact.
            if let Err(e) = self.checkpoints.write_final(&final_state).await {
                warn!(error = %e, "Failed to write final checkpoint");
            }
            if let Err(e) = self.checkpoints.clear().await {
                warn!(error = %e, "Failed to clear checkpoint artifacts");
            }
        } else {
            if let Err(e) = self.checkpoints.write_final(&final_state).await {
                warn!(error = %e, "Failed to write final checkpoint");
            }
            let pending: Vec<String> = frontier.iter().cloned().collect();
            if let Err(e) = self.checkpoints.write_frontier(&pending).await {
                warn!(error = %e, "Failed to write frontier snapshot");
            }
        }

        Ok(CrawlOutcome {
            pages_processed: processed,
            records_discovered: records,
            reason,
        })
    }

    async fn emit(&self, event: CrawlEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped, continuing crawl without emission");
        }
    }

    async fn checkpoint_running(
        &self,
        processed: u64,
        last_url: &Option<String>,
        started_at: DateTime<Utc>,
        frontier: &VecDeque<String>,
    ) {
        let state = CheckpointState::running(processed, last_url.clone(), started_at);
        if let Err(e) = self.checkpoints.write_running(&state).await {
            warn!(error = %e, "Checkpoint write failed, continuing");
            return;
        }
        let pending: Vec<String> = frontier.iter().cloned().collect();
        if let Err(e) = self.checkpoints.write_frontier(&pending).await {
            warn!(error = %e, "Frontier snapshot write failed, continuing");
        }
    }
}

/// Extract and normalize outbound links, in document order.
///
/// Synchronous on purpose: `Html` is not `Send` and must not live across an
/// await point.
fn extract_links(body: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(body);
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| filters::normalize(base, href))
        .collect()
}
