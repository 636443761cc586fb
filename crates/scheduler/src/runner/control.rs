use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use stargaze_container::TaskDefinition;

use super::core::Scheduler;
use crate::config::ExecutionMode;
use crate::error::SchedulerError;
use crate::task::{instant_after, TaskBody, TaskEntry, TaskHandle, TaskId, TaskOptions, TaskState};

impl Scheduler {
    // ── Submission ──────────────────────────────────────────────

    /// Register a task. It starts `Pending` and is picked up by the next
    /// evaluation pass.
    pub fn schedule_task<F>(
        &self,
        options: TaskOptions,
        body: F,
    ) -> Result<TaskHandle, SchedulerError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.schedule_body(options, Arc::new(body))
    }

    /// Register a task whose body is already shared.
    pub fn schedule_body(
        &self,
        options: TaskOptions,
        body: TaskBody,
    ) -> Result<TaskHandle, SchedulerError> {
        let handle = {
            let mut registry = self.shared.lock();
            if let Some(missing) = options.dependencies.iter().find(|d| !registry.knows(**d)) {
                return Err(SchedulerError::UnknownTask(*missing));
            }

            let id = TaskId::new();
            let seq = registry.next_seq;
            registry.next_seq += 1;

            let dependencies = options.dependencies.clone();
            let entry = TaskEntry::new(id, seq, options, body, Instant::now());
            // A fresh id has no dependents, so these edges cannot close a cycle
            for dependency in dependencies {
                registry.graph.add_edge(id, dependency)?;
            }

            info!(
                "Scheduled task: {} ({}, priority: {}, recurring: {})",
                entry.name,
                id.short(),
                entry.priority,
                entry.recurring
            );
            let handle = TaskHandle::new(id, entry.name.clone());
            registry.tasks.insert(id, entry);
            handle
        };
        self.shared.wake.notify_all();
        Ok(handle)
    }

    /// Schedule a task described by a container definition.
    pub fn schedule_definition<F>(
        &self,
        definition: &TaskDefinition,
        body: F,
    ) -> Result<TaskHandle, SchedulerError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if !definition.enabled {
            return Err(SchedulerError::DefinitionDisabled(definition.name.clone()));
        }
        self.schedule_task(TaskOptions::from(definition), body)
    }

    // ── Per-task control ────────────────────────────────────────

    /// Push a not-yet-running task's earliest start back by `delay`.
    pub fn delay_task(&self, id: TaskId, delay: Duration) -> Result<(), SchedulerError> {
        let mut registry = self.shared.lock();
        let entry = registry.live_mut(id)?;
        match entry.state {
            TaskState::Running => return Err(SchedulerError::AlreadyRunning(id)),
            TaskState::Cancelled => {
                return Err(SchedulerError::AlreadyFinished {
                    id,
                    state: TaskState::Cancelled,
                })
            }
            _ => {}
        }

        entry.not_before = instant_after(entry.not_before.max(Instant::now()), delay);
        entry.state = TaskState::Delayed;
        debug!("Task {} delayed by {:?}", entry.name, delay);
        Ok(())
    }

    /// Make `dependent` wait for `dependency` to complete.
    ///
    /// Rejected if it would create a cycle; the graph is left unchanged.
    pub fn add_dependency(
        &self,
        dependent: TaskId,
        dependency: TaskId,
    ) -> Result<(), SchedulerError> {
        let mut registry = self.shared.lock();
        if !registry.knows(dependency) {
            return Err(SchedulerError::UnknownTask(dependency));
        }
        match registry.live_mut(dependent)?.state {
            TaskState::Running => return Err(SchedulerError::AlreadyRunning(dependent)),
            TaskState::Cancelled => {
                return Err(SchedulerError::AlreadyFinished {
                    id: dependent,
                    state: TaskState::Cancelled,
                })
            }
            _ => {}
        }

        let added = registry.graph.add_edge(dependent, dependency)?;
        if added && !registry.graph.is_satisfied(dependent) {
            if let Some(entry) = registry.tasks.get_mut(&dependent) {
                if entry.state == TaskState::Ready {
                    entry.state = TaskState::Waiting;
                }
            }
        }
        debug!("Dependency added: {} -> {}", dependent.short(), dependency.short());
        Ok(())
    }

    /// Cancel a task. A running body finishes but is neither retried nor
    /// re-armed. Dependents of a cancelled task never become ready.
    pub fn cancel_task(&self, id: TaskId) -> Result<(), SchedulerError> {
        let notice = {
            let mut registry = self.shared.lock();
            let entry = registry.live_mut(id)?;
            let was_running = match entry.state {
                TaskState::Cancelled => {
                    return Err(SchedulerError::AlreadyFinished {
                        id,
                        state: TaskState::Cancelled,
                    })
                }
                state => state == TaskState::Running,
            };
            entry.state = TaskState::Cancelled;
            info!("Task {} cancelled", entry.name);

            registry.metrics.cancelled += 1;
            if was_running {
                None
            } else {
                registry.retire(id)
            }
        };

        if let Some((callback, snapshot)) = notice {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot))).is_err() {
                error!("Completion callback for task {} panicked", snapshot.name);
            }
        }
        self.shared.idle.notify_all();
        Ok(())
    }

    // ── Scheduler-wide control ──────────────────────────────────

    /// Change the concurrency limit. Running bodies are never interrupted;
    /// the worker pool grows if needed.
    pub fn set_max_concurrent_tasks(&self, limit: usize) -> Result<(), SchedulerError> {
        if limit == 0 {
            return Err(SchedulerError::InvalidConcurrency(limit));
        }
        self.shared.pool.ensure_capacity(limit)?;
        self.shared.lock().limiter.set_limit(limit);
        info!("Max concurrent tasks set to {}", limit);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Stop starting new bodies. Running bodies continue.
    pub fn pause(&self) {
        self.shared.lock().paused = true;
        info!("Scheduler paused");
    }

    /// Allow dispatch again. In automatic mode an evaluation pass runs
    /// immediately.
    pub fn resume(&self) {
        let batch = {
            let mut registry = self.shared.lock();
            if !registry.paused {
                return;
            }
            registry.paused = false;
            if registry.mode == ExecutionMode::Automatic {
                registry.evaluate(Instant::now())
            } else {
                Vec::new()
            }
        };
        info!("Scheduler resumed");
        self.shared.dispatch(batch);
        self.shared.wake.notify_all();
    }

    pub fn switch_to_manual_mode(&self) {
        self.shared.lock().mode = ExecutionMode::Manual;
        info!("Switched to manual mode");
    }

    pub fn switch_to_automatic_mode(&self) {
        self.shared.lock().mode = ExecutionMode::Automatic;
        info!("Switched to automatic mode");
        self.shared.wake.notify_all();
    }

    /// Run one evaluation pass now, in either mode. Returns how many tasks
    /// were dispatched.
    pub fn trigger_tasks(&self) -> usize {
        let batch = self.shared.lock().evaluate(Instant::now());
        let dispatched = batch.len();
        self.shared.dispatch(batch);
        debug!("Manual trigger dispatched {} task(s)", dispatched);
        dispatched
    }
}
