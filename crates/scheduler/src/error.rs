use thiserror::Error;

use crate::graph::GraphError;
use crate::task::{TaskId, TaskState};

/// Registration and control errors reported synchronously to the caller.
///
/// Registry state is left unchanged whenever one of these is returned.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("task {0} is already running")]
    AlreadyRunning(TaskId),

    #[error("task {id} already finished ({state})")]
    AlreadyFinished { id: TaskId, state: TaskState },

    #[error("dependency error: {0}")]
    Dependency(#[from] GraphError),

    #[error("invalid concurrency limit: {0} (must be at least 1)")]
    InvalidConcurrency(usize),

    #[error("task definition '{0}' is disabled")]
    DefinitionDisabled(String),

    #[error("worker pool error: {0}")]
    Pool(String),
}
