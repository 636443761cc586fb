//! Per-task retry policy and failure classification.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a task body failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The body returned `Err`.
    Error,
    /// The body panicked; caught at the dispatch boundary.
    Panic,
}

/// A single failed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn error(err: &anyhow::Error) -> Self {
        Self {
            kind: FailureKind::Error,
            message: format!("{err:#}"),
        }
    }

    /// Build from a `catch_unwind` payload.
    pub fn panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task body panicked".to_string()
        };
        Self {
            kind: FailureKind::Panic,
            message,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Error => write!(f, "{}", self.message),
            FailureKind::Panic => write!(f, "panic: {}", self.message),
        }
    }
}

/// What to do after a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-attempt after `after`. `attempt` is the 1-based retry number.
    Retry { attempt: u32, after: Duration },
    /// Retries exhausted (or not allowed for this failure kind).
    GiveUp,
}

/// Retry bound and spacing for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-attempts allowed after the first failing run.
    pub max_retries: u32,
    pub interval: Duration,
    /// Whether panics are retried like ordinary errors.
    pub retry_panics: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Fail terminally on the first failure.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            interval: Duration::ZERO,
            retry_panics: true,
        }
    }

    pub fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
            retry_panics: true,
        }
    }

    pub fn with_retry_panics(mut self, retry_panics: bool) -> Self {
        self.retry_panics = retry_panics;
        self
    }

    /// Decide the follow-up to a failure, given retries already consumed.
    pub fn decide(&self, retries_so_far: u32, failure: &TaskFailure) -> RetryDecision {
        if failure.kind == FailureKind::Panic && !self.retry_panics {
            return RetryDecision::GiveUp;
        }
        if retries_so_far < self.max_retries {
            RetryDecision::Retry {
                attempt: retries_so_far + 1,
                after: self.interval,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
