use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::info;

use crate::config::{ExecutionMode, SchedulerConfig};
use crate::error::SchedulerError;
use crate::graph::DependencyGraph;
use crate::limiter::ConcurrencyLimiter;
use crate::metrics::SchedulerMetrics;
use crate::pool::WorkerPool;
use crate::task::{
    instant_after, CompletionCallback, TaskEntry, TaskId, TaskSnapshot, TaskState,
};

/// Callback to run (outside the lock) once a task reaches an outcome.
pub(super) type Notice = (CompletionCallback, TaskSnapshot);

/// Mutable scheduler state, guarded by one mutex.
pub(super) struct Registry {
    /// Live tasks.
    pub tasks: HashMap<TaskId, TaskEntry>,
    /// Retired tasks (completed, failed or cancelled), body dropped.
    pub history: HashMap<TaskId, TaskSnapshot>,
    pub graph: DependencyGraph,
    pub limiter: ConcurrencyLimiter,
    pub mode: ExecutionMode,
    pub paused: bool,
    pub next_seq: u64,
    pub metrics: SchedulerMetrics,
}

impl Registry {
    fn new(limit: usize, mode: ExecutionMode) -> Self {
        Self {
            tasks: HashMap::new(),
            history: HashMap::new(),
            graph: DependencyGraph::new(),
            limiter: ConcurrencyLimiter::new(limit),
            mode,
            paused: false,
            next_seq: 0,
            metrics: SchedulerMetrics::default(),
        }
    }

    /// Whether `id` was scheduled here. Completed ids stay known after
    /// their history is cleared.
    pub fn knows(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
            || self.history.contains_key(&id)
            || self.graph.is_completed(id)
    }

    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.tasks
            .get(&id)
            .map(|e| e.state)
            .or_else(|| self.history.get(&id).map(|s| s.state))
    }

    /// Live entry for a control operation; retired or unknown ids are errors.
    pub fn live_mut(&mut self, id: TaskId) -> Result<&mut TaskEntry, SchedulerError> {
        if let Some(snapshot) = self.history.get(&id) {
            return Err(SchedulerError::AlreadyFinished {
                id,
                state: snapshot.state,
            });
        }
        self.tasks.get_mut(&id).ok_or(SchedulerError::UnknownTask(id))
    }

    /// Move a task from the live set to history.
    pub fn retire(&mut self, id: TaskId) -> Option<Notice> {
        let entry = self.tasks.remove(&id)?;
        let snapshot = entry.snapshot();
        self.graph.forget(id);
        self.history.insert(id, snapshot.clone());
        entry.on_finish.map(|cb| (cb, snapshot))
    }
}

/// State shared between the public handle, the tick thread and pool workers.
pub(super) struct Shared {
    pub config: SchedulerConfig,
    pub registry: Mutex<Registry>,
    /// Wakes the tick thread early (new work, completions, resume).
    pub wake: Condvar,
    /// Signalled whenever a body finishes or a task retires.
    pub idle: Condvar,
    pub pool: WorkerPool,
    pub shutdown: AtomicBool,
}

impl Shared {
    /// Lock the registry. Mutations are small and never left half-applied,
    /// so a poisoned lock is still consistent.
    pub fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The task scheduler.
///
/// Construct one explicitly and hand collaborators an `Arc<Scheduler>`.
/// Dropping it stops the tick thread; bodies already running finish on the
/// worker pool.
///
/// Retired tasks leave a snapshot in history and their id in the dependency
/// graph's completion set. Both grow for the life of the scheduler: a
/// long-running process should call [`clear_history`](Self::clear_history)
/// periodically. Completion records are never dropped, at the cost of one
/// id per completed task, so dependencies on old tasks stay satisfied.
pub struct Scheduler {
    pub(super) shared: Arc<Shared>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler and start its tick thread.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let limit = config.resolved_max_concurrent();
        let pool = WorkerPool::new(config.resolved_worker_threads())?;
        let mode = config.start_mode;

        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::new(limit, mode)),
            wake: Condvar::new(),
            idle: Condvar::new(),
            pool,
            shutdown: AtomicBool::new(false),
            config,
        });

        let tick_shared = Arc::clone(&shared);
        let ticker = thread::Builder::new()
            .name("stargaze-tick".into())
            .spawn(move || tick_shared.tick_loop())
            .map_err(|e| SchedulerError::Pool(format!("failed to spawn tick thread: {e}")))?;

        info!(
            "Scheduler started: {:?} mode, concurrency {}, {} workers",
            mode,
            limit,
            shared.pool.threads()
        );

        Ok(Self {
            shared,
            ticker: Mutex::new(Some(ticker)),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Stop the tick thread. Idempotent; also called on drop.
    ///
    /// Manual `trigger_tasks()` keeps working afterwards.
    pub fn shutdown(&self) {
        {
            let _registry = self.shared.lock();
            if self.shared.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
            self.shared.wake.notify_all();
        }
        info!("Scheduler shutdown requested");
        let handle = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Current state of a live or retired task.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.shared.lock().state_of(id)
    }

    pub fn task(&self, id: TaskId) -> Option<TaskSnapshot> {
        let registry = self.shared.lock();
        registry
            .tasks
            .get(&id)
            .map(TaskEntry::snapshot)
            .or_else(|| registry.history.get(&id).cloned())
    }

    /// Live tasks in submission order.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        let registry = self.shared.lock();
        let mut entries: Vec<&TaskEntry> = registry.tasks.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(TaskEntry::snapshot).collect()
    }

    /// Retired tasks (completed, failed, cancelled).
    pub fn finished_tasks(&self) -> Vec<TaskSnapshot> {
        self.shared.lock().history.values().cloned().collect()
    }

    /// Drop retired snapshots. Completion records used for dependency
    /// checks are kept. Returns how many were dropped.
    ///
    /// History is not pruned on its own; long-running callers own this.
    pub fn clear_history(&self) -> usize {
        let mut registry = self.shared.lock();
        let n = registry.history.len();
        registry.history.clear();
        n
    }

    pub fn running_count(&self) -> usize {
        self.shared.lock().limiter.running()
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.shared.lock().limiter.limit()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.shared.lock().mode
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let registry = self.shared.lock();
        let mut metrics = registry.metrics.clone();
        for entry in registry.tasks.values() {
            *metrics.tasks_by_state.entry(entry.state).or_default() += 1;
        }
        metrics.running = registry.limiter.running();
        metrics.max_concurrent = registry.limiter.limit();
        metrics.worker_utilization = registry.limiter.utilization();
        metrics.mode = registry.mode;
        metrics.paused = registry.paused;
        metrics
    }

    // ── Waiting ─────────────────────────────────────────────────

    /// Block until no body is running, or `timeout` passes. Returns whether
    /// the scheduler went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = instant_after(Instant::now(), timeout);
        let mut registry = self.shared.lock();
        while registry.limiter.running() > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            registry = self
                .shared
                .idle
                .wait_timeout(registry, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Block until the task retires and return its final state, or `None` on
    /// timeout or if the id is unknown. Recurring tasks only retire when
    /// cancelled or failed.
    pub fn wait_until_finished(&self, id: TaskId, timeout: Duration) -> Option<TaskState> {
        let deadline = instant_after(Instant::now(), timeout);
        let mut registry = self.shared.lock();
        loop {
            if let Some(snapshot) = registry.history.get(&id) {
                return Some(snapshot.state);
            }
            if !registry.tasks.contains_key(&id) {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            registry = self
                .shared
                .idle
                .wait_timeout(registry, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
