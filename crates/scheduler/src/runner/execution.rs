use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::core::{Notice, Registry, Shared};
use super::scheduling::Dispatch;
use crate::config::ExecutionMode;
use crate::retry::{RetryDecision, TaskFailure};
use crate::task::{instant_after, TaskId, TaskState};

impl Shared {
    /// Automatic-mode loop: evaluate every tick, or earlier when woken.
    pub(super) fn tick_loop(self: Arc<Self>) {
        let interval = self.config.tick_interval();
        debug!("Tick loop started ({}ms interval)", interval.as_millis());

        let mut registry = self.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            registry = self
                .wake
                .wait_timeout(registry, interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if registry.mode != ExecutionMode::Automatic {
                continue;
            }

            let pass = panic::catch_unwind(AssertUnwindSafe(|| registry.evaluate(Instant::now())));
            let batch = match pass {
                Ok(batch) => batch,
                Err(payload) => {
                    let failure = TaskFailure::panic(payload.as_ref());
                    error!("Evaluation pass panicked, skipping tick: {}", failure.message);
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }
            drop(registry);
            self.dispatch(batch);
            registry = self.lock();
        }

        debug!("Tick loop stopped");
    }

    /// Hand claimed tasks to the worker pool.
    pub(super) fn dispatch(self: &Arc<Self>, batch: Vec<Dispatch>) {
        for job in batch {
            debug!(task = %job.name, attempt = job.attempt, "dispatching task");
            let shared = Arc::clone(self);
            self.pool.spawn(move || shared.run_body(job));
        }
    }

    fn run_body(&self, job: Dispatch) {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (job.body)()));
        let elapsed = started.elapsed();

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(TaskFailure::error(&e)),
            Err(payload) => Some(TaskFailure::panic(payload.as_ref())),
        };

        let notice = self
            .lock()
            .finish(job.id, failure, elapsed, Instant::now());

        if let Some((callback, snapshot)) = notice {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot))).is_err() {
                error!("Completion callback for task {} panicked", snapshot.name);
            }
        }

        self.idle.notify_all();
        self.wake.notify_all();
    }
}

impl Registry {
    /// Apply the outcome of one run. Returns the completion callback to
    /// invoke, if the outcome is final for this run.
    pub(super) fn finish(
        &mut self,
        id: TaskId,
        failure: Option<TaskFailure>,
        elapsed: Duration,
        now: Instant,
    ) -> Option<Notice> {
        self.limiter.release();
        let entry = self.tasks.get_mut(&id)?;
        self.metrics
            .record_execution(&entry.name, elapsed, failure.is_none());

        if entry.state == TaskState::Cancelled {
            if let Some(failure) = &failure {
                entry.last_error = Some(failure.to_string());
            }
            info!("Cancelled task {} finished its last run", entry.name);
            return self.retire(id);
        }

        match failure {
            None if entry.recurring => {
                entry.state = TaskState::Completed;
                let snapshot = entry.snapshot();
                entry.state = TaskState::Pending;
                entry.retry_count = 0;
                entry.not_before = instant_after(now, entry.delay);
                debug!(
                    "Recurring task {} completed run {} in {:?}, re-armed",
                    entry.name, entry.execution_count, elapsed
                );
                let callback = entry.on_finish.clone();
                self.graph.mark_completed(id);
                callback.map(|cb| (cb, snapshot))
            }
            None => {
                entry.state = TaskState::Completed;
                info!("Task {} completed in {:?}", entry.name, elapsed);
                self.graph.mark_completed(id);
                self.retire(id)
            }
            Some(failure) => {
                entry.last_error = Some(failure.to_string());
                match entry.retry.decide(entry.retry_count, &failure) {
                    RetryDecision::Retry { attempt, after } => {
                        warn!(
                            "Task {} failed ({}), retry {}/{} in {:?}",
                            entry.name, failure, attempt, entry.retry.max_retries, after
                        );
                        entry.retry_count = attempt;
                        entry.state = TaskState::Delayed;
                        entry.not_before = instant_after(now, after);
                        self.metrics.retries += 1;
                        None
                    }
                    RetryDecision::GiveUp => {
                        error!(
                            "Task {} failed after {} runs: {}",
                            entry.name, entry.execution_count, failure
                        );
                        entry.state = TaskState::Failed;
                        self.metrics.terminal_failures += 1;
                        self.retire(id)
                    }
                }
            }
        }
    }
}
