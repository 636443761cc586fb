use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use stargaze_container::TaskDefinition;

use crate::retry::{RetryPolicy, TaskFailure};

/// Horizon used when a requested wait does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `from + wait`, saturating to a far-future instant instead of overflowing.
pub(crate) fn instant_after(from: Instant, wait: Duration) -> Instant {
    if let Some(at) = from.checked_add(wait) {
        return at;
    }
    let mut horizon = wait.min(FAR_FUTURE);
    loop {
        match from.checked_add(horizon) {
            Some(at) => return at,
            None => horizon /= 2,
        }
    }
}

/// Opaque task body. Returning `Err` (or panicking) marks the run as failed.
pub type TaskBody = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Readiness gate checked while a task waits on its dependencies.
///
/// Evaluated under the scheduler's registry lock: it must not call back into
/// the scheduler.
pub type TaskCondition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Invoked with the task's snapshot after a run that does not lead to a retry.
pub type CompletionCallback = Arc<dyn Fn(&TaskSnapshot) + Send + Sync>;

/// Unique task identifier, assigned at scheduling time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight hex digits, for default task names and compact logs.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Registered (or re-armed), not yet evaluated.
    Pending,
    /// Waiting for its initial delay or retry interval to elapse.
    Delayed,
    /// Waiting for dependencies or its condition.
    Waiting,
    /// Eligible; waiting for a concurrency slot.
    Ready,
    Running,
    Completed,
    /// Retries exhausted. Terminal.
    Failed,
    Cancelled,
}

impl TaskState {
    /// Whether the task will never run again.
    ///
    /// `Completed` counts as terminal only for the public view; a recurring
    /// task passes through it and re-arms.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// States in which a task has not started its current attempt.
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Delayed | Self::Waiting | Self::Ready
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Delayed => "delayed",
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

// ── Submission ──────────────────────────────────────────────────────

/// Everything about a task except its body, given to
/// [`Scheduler::schedule_task`](crate::Scheduler::schedule_task).
#[derive(Clone, Default)]
pub struct TaskOptions {
    pub(crate) name: Option<String>,
    pub(crate) priority: i32,
    pub(crate) recurring: bool,
    pub(crate) retry: RetryPolicy,
    pub(crate) delay: Duration,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) condition: Option<TaskCondition>,
    pub(crate) on_finish: Option<CompletionCallback>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry.interval = interval;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run only after `dependency` has completed. May be called repeatedly.
    pub fn depends_on(mut self, dependency: TaskId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn on_finish<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TaskSnapshot) + Send + Sync + 'static,
    {
        self.on_finish = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("recurring", &self.recurring)
            .field("retry", &self.retry)
            .field("delay", &self.delay)
            .field("dependencies", &self.dependencies)
            .field("has_condition", &self.condition.is_some())
            .finish()
    }
}

impl From<&TaskDefinition> for TaskOptions {
    fn from(def: &TaskDefinition) -> Self {
        Self::new()
            .name(def.name.clone())
            .priority(def.priority)
            .recurring(def.recurring)
            .max_retries(def.max_retries)
            .retry_interval(def.retry_interval())
            .delay(def.delay())
    }
}

/// Returned by `schedule_task`; identifies the task in later control calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    id: TaskId,
    name: String,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, name: String) -> Self {
        Self { id, name }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ── Observation ─────────────────────────────────────────────────────

/// Point-in-time view of a task, safe to hand out.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub priority: i32,
    pub recurring: bool,
    pub state: TaskState,
    pub execution_count: u32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

// ── Registry entry ──────────────────────────────────────────────────

/// Live record owned by the scheduler registry.
pub(crate) struct TaskEntry {
    pub id: TaskId,
    /// Submission order, used to break priority ties.
    pub seq: u64,
    pub name: String,
    pub priority: i32,
    pub recurring: bool,
    pub retry: RetryPolicy,
    pub delay: Duration,
    pub body: TaskBody,
    pub condition: Option<TaskCondition>,
    pub on_finish: Option<CompletionCallback>,
    pub state: TaskState,
    pub execution_count: u32,
    pub retry_count: u32,
    /// Earliest instant the task may leave `Pending`/`Delayed`.
    pub not_before: Instant,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

impl TaskEntry {
    pub fn new(id: TaskId, seq: u64, options: TaskOptions, body: TaskBody, now: Instant) -> Self {
        let name = options
            .name
            .unwrap_or_else(|| format!("task-{}", id.short()));
        Self {
            id,
            seq,
            name,
            priority: options.priority,
            recurring: options.recurring,
            retry: options.retry,
            delay: options.delay,
            body,
            condition: options.condition,
            on_finish: options.on_finish,
            state: TaskState::Pending,
            execution_count: 0,
            retry_count: 0,
            not_before: instant_after(now, options.delay),
            last_error: None,
            scheduled_at: Utc::now(),
            last_run: None,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            priority: self.priority,
            recurring: self.recurring,
            state: self.state,
            execution_count: self.execution_count,
            retry_count: self.retry_count,
            max_retries: self.retry.max_retries,
            last_error: self.last_error.clone(),
            scheduled_at: self.scheduled_at,
            last_run: self.last_run,
        }
    }

    /// Whether the condition gate (if any) currently passes. A panicking
    /// condition counts as not met.
    pub fn condition_met(&self) -> bool {
        let Some(condition) = &self.condition else {
            return true;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| condition())) {
            Ok(met) => met,
            Err(payload) => {
                let failure = TaskFailure::panic(payload.as_ref());
                error!(task = %self.name, "Condition panicked: {}", failure.message);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TaskBody {
        Arc::new(|| Ok(()))
    }

    #[test]
    fn task_ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Ready.is_waiting());
        assert!(!TaskState::Running.is_waiting());
    }

    #[test]
    fn entry_defaults_name_and_delay() {
        let id = TaskId::new();
        let now = Instant::now();
        let options = TaskOptions::new().delay(Duration::from_millis(500));
        let entry = TaskEntry::new(id, 7, options, noop(), now);

        assert_eq!(entry.name, format!("task-{}", id.short()));
        assert_eq!(entry.state, TaskState::Pending);
        assert_eq!(entry.not_before, now + Duration::from_millis(500));
        assert!(entry.condition_met());
    }

    #[test]
    fn options_from_definition() {
        let def = TaskDefinition::new("plate_solve")
            .with_priority(4)
            .with_recurring(true)
            .with_retries(2, Duration::from_millis(100))
            .with_delay(Duration::from_secs(1));
        let options = TaskOptions::from(&def);

        assert_eq!(options.name.as_deref(), Some("plate_solve"));
        assert_eq!(options.priority, 4);
        assert!(options.recurring);
        assert_eq!(options.retry.max_retries, 2);
        assert_eq!(options.retry.interval, Duration::from_millis(100));
        assert_eq!(options.delay, Duration::from_secs(1));
    }

    #[test]
    fn oversized_delay_saturates() {
        let now = Instant::now();
        let entry = TaskEntry::new(
            TaskId::new(),
            0,
            TaskOptions::new().delay(Duration::MAX),
            noop(),
            now,
        );
        assert!(entry.not_before > now + Duration::from_secs(365 * 24 * 60 * 60));
        assert_eq!(
            instant_after(now, Duration::from_millis(5)),
            now + Duration::from_millis(5)
        );
    }

    #[test]
    fn panicking_condition_is_not_met() {
        let entry = TaskEntry::new(
            TaskId::new(),
            0,
            TaskOptions::new().condition(|| panic!("dew heater offline")),
            noop(),
            Instant::now(),
        );
        assert!(!entry.condition_met());
    }

    #[test]
    fn condition_gate() {
        let entry = TaskEntry::new(
            TaskId::new(),
            0,
            TaskOptions::new().condition(|| false),
            noop(),
            Instant::now(),
        );
        assert!(!entry.condition_met());
    }
}
