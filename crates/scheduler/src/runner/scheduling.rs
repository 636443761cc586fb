use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::debug;

use super::core::Registry;
use crate::task::{TaskBody, TaskId, TaskState};

/// A task claimed by an evaluation pass, to be run outside the lock.
pub(super) struct Dispatch {
    pub id: TaskId,
    pub name: String,
    pub body: TaskBody,
    /// 1-based execution number of this run.
    pub attempt: u32,
}

impl Registry {
    /// One evaluation pass: advance timers and readiness, then claim ready
    /// tasks for execution in priority order while slots remain.
    ///
    /// While paused, states still advance but nothing is claimed.
    pub fn evaluate(&mut self, now: Instant) -> Vec<Dispatch> {
        self.advance(now);
        if self.paused {
            return Vec::new();
        }
        self.claim_ready()
    }

    fn advance(&mut self, now: Instant) {
        let graph = &self.graph;
        for entry in self.tasks.values_mut() {
            if matches!(entry.state, TaskState::Pending | TaskState::Delayed) {
                let next = if entry.not_before <= now {
                    TaskState::Waiting
                } else {
                    TaskState::Delayed
                };
                if next != entry.state {
                    debug!(task = %entry.name, from = %entry.state, to = %next, "task advanced");
                    entry.state = next;
                }
            }

            if entry.state == TaskState::Waiting
                && graph.is_satisfied(entry.id)
                && entry.condition_met()
            {
                debug!(task = %entry.name, "task ready");
                entry.state = TaskState::Ready;
            }
        }
    }

    fn claim_ready(&mut self) -> Vec<Dispatch> {
        if self.limiter.available() == 0 {
            return Vec::new();
        }

        // Highest priority first, submission order within a priority
        let mut ready: Vec<(i32, u64, TaskId)> = self
            .tasks
            .values()
            .filter(|e| e.state == TaskState::Ready)
            .map(|e| (e.priority, e.seq, e.id))
            .collect();
        ready.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut batch = Vec::new();
        for (_, _, id) in ready {
            if !self.limiter.try_acquire() {
                break;
            }
            match self.tasks.get_mut(&id) {
                Some(entry) => {
                    entry.state = TaskState::Running;
                    entry.execution_count += 1;
                    entry.last_run = Some(Utc::now());
                    batch.push(Dispatch {
                        id,
                        name: entry.name.clone(),
                        body: Arc::clone(&entry.body),
                        attempt: entry.execution_count,
                    });
                }
                None => self.limiter.release(),
            }
        }
        batch
    }
}
