//! Tick-driven task scheduler for the imaging automation pipeline.
//!
//! Tasks carry a priority, optional recurrence, an initial delay, dependency
//! edges on other tasks and a retry policy. The [`Scheduler`] evaluates them
//! on a periodic tick (automatic mode) or on explicit
//! [`trigger_tasks`](Scheduler::trigger_tasks) calls (manual mode) and runs
//! their bodies on a bounded worker pool.

pub mod config;
pub mod error;
pub mod graph;
pub mod limiter;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod runner;
pub mod task;

pub use config::{ConfigError, ExecutionMode, SchedulerConfig};
pub use error::SchedulerError;
pub use graph::{DependencyGraph, GraphError};
pub use metrics::SchedulerMetrics;
pub use retry::{FailureKind, RetryDecision, RetryPolicy, TaskFailure};
pub use runner::Scheduler;
pub use task::{TaskBody, TaskHandle, TaskId, TaskOptions, TaskSnapshot, TaskState};

pub use stargaze_container::{TaskContainer, TaskDefinition};
