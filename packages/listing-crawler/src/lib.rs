//! Resumable listing-site crawl worker.
//!
//! A crawl run is a long-lived, single-logical-thread traversal over one
//! portal: fetch a page through the cascading upstream client, classify its
//! outbound links, emit discovered listing URLs as events, and keep going
//! until the frontier is exhausted or the run is interrupted. Progress is
//! checkpointed to disk so an interrupted run resumes instead of restarting.
//!
//! ```text
//! CrawlWorker::run(cancel)
//!     │
//!     ├─► CheckpointStore::load()  ── resume frontier, or fresh start
//!     ├─► loop: frontier.pop_front()
//!     │       ├─► PageFetcher::fetch()      (cascade client)
//!     │       ├─► classify links            (follow / record / skip)
//!     │       ├─► emit CrawlEvent           (mpsc → ReceiverStream)
//!     │       └─► checkpoint every N pages
//!     └─► terminate: persist final state + frontier, or clear on finish
//! ```

pub mod checkpoint;
pub mod config;
pub mod events;
pub mod fetch;
pub mod filters;
pub mod worker;

pub use checkpoint::{CheckpointError, CheckpointState, CheckpointStore, TerminationReason};
pub use config::SpiderConfig;
pub use events::{event_stream, CrawlEvent};
pub use fetch::{FetchedPage, PageFetcher};
pub use filters::LinkClass;
pub use worker::{CrawlOutcome, CrawlWorker};
