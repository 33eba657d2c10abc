//! Job scheduling and execution dispatch for listing crawls.
//!
//! Jobs are durable definitions (what to crawl, on what schedule); executions
//! are individual run attempts. The dispatcher guarantees at most one running
//! execution per job and keeps the job row and its execution rows moving in
//! lockstep.
//!
//! ```text
//! scheduler (every minute)
//!     └─► run_due_sweep ── find_due_jobs
//!             └─► ExecutionDispatcher::dispatch
//!                     ├─► JobStore::begin_execution   (atomic, conflict-checked)
//!                     └─► TaskQueue::submit ──► ExecutionRunner
//!                             └─► CrawlWorker::run(cancel)
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod queue;
pub mod runner;
pub mod schedule;
pub mod store;
pub mod sweep;
pub mod testing;

pub use config::Config;
pub use dispatcher::{ExecutionDispatcher, JobStatusReport};
pub use error::{DispatchError, JobError, ScheduleError};
pub use models::{Execution, ExecutionStatus, JobDefinition, JobStatus, NewJob};
pub use queue::{CrawlExecutor, CrawlTask, TaskQueue, TaskState, TokioTaskQueue};
pub use runner::ExecutionRunner;
pub use schedule::{compute_next_run, CronSchedule, ScheduleKind};
pub use store::{ExecutionOutcome, JobStore, PostgresJobStore};
pub use sweep::{run_due_sweep, start_scheduler};
