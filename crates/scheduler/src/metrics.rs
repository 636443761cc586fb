use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ExecutionMode;
use crate::task::TaskState;

/// Scheduler operational metrics, exposed to dashboards and logs.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    /// Body executions by task name.
    pub tasks_executed: HashMap<String, u64>,
    /// Average body duration by task name.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Last execution time by task name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Runs that returned successfully.
    pub succeeded: u64,
    /// Runs that returned an error or panicked.
    pub failed_runs: u64,
    /// Retries scheduled after a failed run.
    pub retries: u64,
    /// Tasks that exhausted their retries.
    pub terminal_failures: u64,
    pub cancelled: u64,
    /// Live tasks per state.
    pub tasks_by_state: HashMap<TaskState, usize>,
    pub running: usize,
    pub max_concurrent: usize,
    /// running / max_concurrent
    pub worker_utilization: f64,
    pub mode: ExecutionMode,
    pub paused: bool,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self {
            tasks_executed: HashMap::new(),
            avg_task_duration: HashMap::new(),
            last_run: HashMap::new(),
            succeeded: 0,
            failed_runs: 0,
            retries: 0,
            terminal_failures: 0,
            cancelled: 0,
            tasks_by_state: HashMap::new(),
            running: 0,
            max_concurrent: 0,
            worker_utilization: 0.0,
            mode: ExecutionMode::Automatic,
            paused: false,
        }
    }
}

impl SchedulerMetrics {
    /// Record a finished body execution.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration, success: bool) {
        if success {
            self.succeeded += 1;
        } else {
            self.failed_runs += 1;
        }

        let count = self.tasks_executed.entry(task_name.to_string()).or_default();
        *count += 1;
        let count = *count;
        self.last_run.insert(task_name.to_string(), Utc::now());

        let avg = self
            .avg_task_duration
            .entry(task_name.to_string())
            .or_default();
        *avg = running_mean(*avg, duration, count);
    }

    /// Total body executions across all tasks.
    pub fn total_executions(&self) -> u64 {
        self.succeeded + self.failed_runs
    }
}

/// Incremental mean: `prev + (sample - prev) / count`, in whole nanoseconds.
fn running_mean(prev: Duration, sample: Duration, count: u64) -> Duration {
    if count <= 1 {
        return sample;
    }
    let (prev, sample) = (prev.as_nanos(), sample.as_nanos());
    let n = u128::from(count);
    let mean = if sample >= prev {
        prev + (sample - prev) / n
    } else {
        prev - (prev - sample) / n
    };
    Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX))
}
