//! Durable crawl progress, keyed by worker identity.
//!
//! Three related files live under one directory per crawl: the running
//! checkpoint (written every N pages), the final state (written once at
//! termination), and the pending-frontier snapshot. All three are JSON
//! documents with an explicit version tag, written atomically
//! (write-temp-then-rename) so a crash mid-write never leaves a corrupt
//! checkpoint behind, and all three are invalidated together by [`clear`].
//!
//! [`clear`]: CheckpointStore::clear

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Schema version for all checkpoint files. Bump on incompatible change;
/// a mismatched file is treated as stale, never migrated in place.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Checkpoints older than this are ignored at startup.
const STALENESS_DAYS: i64 = 7;

const RUNNING_FILE: &str = "running.json";
const FINAL_FILE: &str = "final.json";
const FRONTIER_FILE: &str = "frontier.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Why a crawl run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Frontier exhausted; nothing left to visit.
    Finished,
    /// Configured page quota reached.
    QuotaExhausted,
    /// Cancelled through the task queue or an interrupt signal.
    UserInterrupt,
    /// Process shutdown requested.
    Shutdown,
    Other,
}

/// Snapshot of a crawl worker's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    pub pages_processed: u64,
    pub last_url: Option<String>,
    /// None while the run is still in flight.
    pub reason: Option<TerminationReason>,
    pub started_at: DateTime<Utc>,
    pub written_at: DateTime<Utc>,
}

impl CheckpointState {
    pub fn running(pages_processed: u64, last_url: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            pages_processed,
            last_url,
            reason: None,
            started_at,
            written_at: Utc::now(),
        }
    }

    pub fn terminal(
        pages_processed: u64,
        last_url: Option<String>,
        reason: TerminationReason,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            pages_processed,
            last_url,
            reason: Some(reason),
            started_at,
            written_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FrontierSnapshot {
    version: u32,
    pending: Vec<String>,
}

/// What a resuming worker picks up from disk.
#[derive(Debug, Clone)]
pub struct ResumeState {
    pub pages_processed: u64,
    pub last_url: Option<String>,
    pub frontier: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Filesystem-backed checkpoint persistence for one crawl identity.
pub struct CheckpointStore {
    dir: PathBuf,
    staleness: Duration,
}

impl CheckpointStore {
    /// Store rooted at `root`, scoped to one crawl identity (job id).
    pub fn new(root: impl AsRef<Path>, key: &str) -> Self {
        Self {
            dir: root.as_ref().join(key),
            staleness: Duration::days(STALENESS_DAYS),
        }
    }

    /// Override the staleness window (tests).
    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Persist the running checkpoint.
    pub async fn write_running(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        self.write_json(RUNNING_FILE, state).await
    }

    /// Persist the final state at termination.
    pub async fn write_final(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        self.write_json(FINAL_FILE, state).await
    }

    /// Persist the pending-URL frontier.
    pub async fn write_frontier(&self, pending: &[String]) -> Result<(), CheckpointError> {
        let snapshot = FrontierSnapshot {
            version: CHECKPOINT_VERSION,
            pending: pending.to_vec(),
        };
        self.write_json(FRONTIER_FILE, &snapshot).await
    }

    /// Load resumable state, if any.
    ///
    /// Returns `None` when there is nothing to resume: no files, a version
    /// mismatch, a checkpoint older than the staleness window, or a final
    /// state whose reason is `finished`.
    pub async fn load(&self) -> Result<Option<ResumeState>, CheckpointError> {
        // Prefer the final state: it pairs with the frontier written at
        // termination. Fall back to the running checkpoint for hard crashes.
        let state = match self.read_state(FINAL_FILE).await? {
            Some(state) => Some(state),
            None => self.read_state(RUNNING_FILE).await?,
        };

        let Some(state) = state else {
            return Ok(None);
        };

        if state.version != CHECKPOINT_VERSION {
            warn!(
                dir = %self.dir.display(),
                found = state.version,
                expected = CHECKPOINT_VERSION,
                "Ignoring checkpoint with mismatched version"
            );
            return Ok(None);
        }

        if state.reason == Some(TerminationReason::Finished) {
            debug!(dir = %self.dir.display(), "Previous run finished, ignoring checkpoint");
            return Ok(None);
        }

        if Utc::now() - state.written_at > self.staleness {
            warn!(
                dir = %self.dir.display(),
                written_at = %state.written_at,
                "Ignoring stale checkpoint"
            );
            return Ok(None);
        }

        let Some(frontier) = self.read_frontier().await? else {
            debug!(dir = %self.dir.display(), "Checkpoint has no frontier snapshot, starting fresh");
            return Ok(None);
        };

        Ok(Some(ResumeState {
            pages_processed: state.pages_processed,
            last_url: state.last_url,
            frontier,
            started_at: state.started_at,
        }))
    }

    /// Remove all checkpoint artifacts. Idempotent.
    pub async fn clear(&self) -> Result<(), CheckpointError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_state(&self, name: &str) -> Result<Option<CheckpointState>, CheckpointError> {
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => Ok(Some(state)),
                Err(e) => {
                    // Corrupt file: treat as absent rather than failing startup.
                    warn!(file = name, error = %e, "Discarding unreadable checkpoint file");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_frontier(&self) -> Result<Option<Vec<String>>, CheckpointError> {
        match tokio::fs::read(self.dir.join(FRONTIER_FILE)).await {
            Ok(bytes) => match serde_json::from_slice::<FrontierSnapshot>(&bytes) {
                Ok(snapshot) if snapshot.version == CHECKPOINT_VERSION => {
                    Ok(Some(snapshot.pending))
                }
                Ok(_) => Ok(None),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable frontier snapshot");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<V: Serialize>(&self, name: &str, value: &V) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = self.dir.join(format!("{name}.tmp"));
        let path = self.dir.join(name);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path) -> CheckpointStore {
        CheckpointStore::new(root, "job-1")
    }

    #[tokio::test]
    async fn load_returns_none_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interrupted_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cp = store(dir.path());
        let started = Utc::now();

        cp.write_final(&CheckpointState::terminal(
            120,
            Some("https://example.com/a/".into()),
            TerminationReason::UserInterrupt,
            started,
        ))
        .await
        .unwrap();
        cp.write_frontier(&["https://example.com/b/".into(), "https://example.com/c/".into()])
            .await
            .unwrap();

        let resume = cp.load().await.unwrap().expect("resumable state");
        assert_eq!(resume.pages_processed, 120);
        assert_eq!(resume.frontier.len(), 2);
        assert_eq!(resume.last_url.as_deref(), Some("https://example.com/a/"));
    }

    #[tokio::test]
    async fn finished_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cp = store(dir.path());

        cp.write_final(&CheckpointState::terminal(
            10,
            None,
            TerminationReason::Finished,
            Utc::now(),
        ))
        .await
        .unwrap();
        cp.write_frontier(&["https://example.com/x/".into()]).await.unwrap();

        assert!(cp.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cp = store(dir.path()).with_staleness(Duration::zero());

        cp.write_final(&CheckpointState::terminal(
            10,
            None,
            TerminationReason::Shutdown,
            Utc::now(),
        ))
        .await
        .unwrap();
        cp.write_frontier(&["https://example.com/x/".into()]).await.unwrap();

        // Zero staleness window: anything already written is too old.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(cp.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn version_mismatch_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cp = store(dir.path());

        let mut state = CheckpointState::terminal(5, None, TerminationReason::Shutdown, Utc::now());
        state.version = CHECKPOINT_VERSION + 1;
        cp.write_final(&state).await.unwrap();
        cp.write_frontier(&["https://example.com/x/".into()]).await.unwrap();

        assert!(cp.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cp = store(dir.path());

        cp.write_running(&CheckpointState::running(1, None, Utc::now()))
            .await
            .unwrap();
        cp.clear().await.unwrap();
        cp.clear().await.unwrap();
        assert!(cp.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn running_checkpoint_resumes_after_crash() {
        // No final state on disk, only the periodic running checkpoint.
        let dir = tempfile::tempdir().unwrap();
        let cp = store(dir.path());

        cp.write_running(&CheckpointState::running(
            50,
            Some("https://example.com/p/".into()),
            Utc::now(),
        ))
        .await
        .unwrap();
        cp.write_frontier(&["https://example.com/q/".into()]).await.unwrap();

        let resume = cp.load().await.unwrap().expect("resumable state");
        assert_eq!(resume.pages_processed, 50);
    }
}
