pub mod execution;
pub mod job;

pub use execution::{Execution, ExecutionStatus};
pub use job::{JobDefinition, JobStatus, NewJob};
