//! Events emitted by a crawl run (facts about what happened).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

/// Stream of facts a crawl run produces, consumed by the persistence
/// pipeline. Each discovered item is emitted at least once per run;
/// duplicates across resumed runs are possible and must be tolerated
/// downstream (the content hash supports idempotent upsert).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    /// A listing URL worth recording was discovered.
    RecordDiscovered {
        url: Url,
        /// SHA-256 of the page body the link was found on.
        source_hash: String,
        discovered_at: DateTime<Utc>,
    },

    /// A page was fetched and traversed ("seen URL" record).
    PageVisited {
        url: Url,
        pages_processed: u64,
    },
}

/// Adapt an event receiver into a `Stream` for pipeline consumers.
pub fn event_stream(rx: mpsc::Receiver<CrawlEvent>) -> ReceiverStream<CrawlEvent> {
    ReceiverStream::new(rx)
}

/// SHA-256 content hash, hex encoded.
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}
