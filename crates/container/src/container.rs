use std::cmp::Ordering;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::definition::TaskDefinition;

#[cfg(test)]
mod tests;

#[derive(Debug, Default)]
struct Inner {
    tasks: IndexMap<String, TaskDefinition>,
    /// Parameter blobs keyed by task name. Independent of `tasks`: a name may
    /// carry params without a stored definition and vice versa.
    params: IndexMap<String, Value>,
}

/// Thread-safe, insertion-ordered registry of [`TaskDefinition`]s.
///
/// Operations on a missing name return `None` or do nothing; the container
/// never fails. Share it between collaborators behind an `Arc`.
#[derive(Debug, Default)]
pub struct TaskContainer {
    inner: RwLock<Inner>,
}

impl TaskContainer {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Definitions ─────────────────────────────────────────────

    /// Insert a definition by name. An existing definition with the same name
    /// is replaced wholesale and keeps its position.
    pub fn add_task(&self, task: TaskDefinition) {
        debug!(task = %task.name, "adding task definition");
        self.write().tasks.insert(task.name.clone(), task);
    }

    pub fn remove_task(&self, name: &str) {
        if self.write().tasks.shift_remove(name).is_some() {
            debug!(task = %name, "removed task definition");
        }
    }

    pub fn clear_tasks(&self) {
        self.write().tasks.clear();
    }

    pub fn get_task(&self, name: &str) -> Option<TaskDefinition> {
        self.read().tasks.get(name).cloned()
    }

    pub fn get_task_count(&self) -> usize {
        self.read().tasks.len()
    }

    /// All definitions in stored order.
    pub fn get_all_tasks(&self) -> Vec<TaskDefinition> {
        self.read().tasks.values().cloned().collect()
    }

    /// Linear filter over stored definitions. Both filters must match; `None`
    /// leaves that field unfiltered.
    pub fn find_tasks(&self, priority: Option<i32>, enabled: Option<bool>) -> Vec<TaskDefinition> {
        self.read()
            .tasks
            .values()
            .filter(|t| priority.map_or(true, |p| t.priority == p))
            .filter(|t| enabled.map_or(true, |e| t.enabled == e))
            .cloned()
            .collect()
    }

    /// Stable sort of the stored order using the caller's comparator.
    pub fn sort_tasks<F>(&self, mut cmp: F)
    where
        F: FnMut(&TaskDefinition, &TaskDefinition) -> Ordering,
    {
        self.write().tasks.sort_by(|_, a, _, b| cmp(a, b));
    }

    // ── Batch operations ────────────────────────────────────────

    pub fn batch_add_tasks(&self, tasks: impl IntoIterator<Item = TaskDefinition>) {
        let mut inner = self.write();
        for task in tasks {
            inner.tasks.insert(task.name.clone(), task);
        }
    }

    pub fn batch_remove_tasks<S: AsRef<str>>(&self, names: impl IntoIterator<Item = S>) {
        let mut inner = self.write();
        for name in names {
            inner.tasks.shift_remove(name.as_ref());
        }
    }

    /// Apply `f` to every stored definition in place.
    ///
    /// If `f` renames a definition it is re-keyed under the new name; when two
    /// definitions end up with the same name the later one wins.
    pub fn batch_modify_tasks<F>(&self, mut f: F)
    where
        F: FnMut(&mut TaskDefinition),
    {
        let mut inner = self.write();
        inner.tasks.values_mut().for_each(&mut f);

        // Definitions stay in the map while `f` runs, so a panic in `f`
        // loses none of them
        if inner.tasks.iter().any(|(key, def)| *key != def.name) {
            let tasks = std::mem::take(&mut inner.tasks);
            inner.tasks = tasks
                .into_values()
                .map(|def| (def.name.clone(), def))
                .collect();
        }
    }

    // ── Parameters ──────────────────────────────────────────────

    /// Set the params for `name`. Last write wins; an existing entry keeps its
    /// position, a new one is appended.
    pub fn add_or_update_task_params(&self, name: impl Into<String>, params: Value) {
        self.write().params.insert(name.into(), params);
    }

    /// Insert params for `name` at `index` in the ordered listing.
    ///
    /// `index` is clamped to the current length. An existing entry for `name`
    /// is replaced and moved to `index`.
    pub fn insert_task_params(&self, name: impl Into<String>, params: Value, index: usize) {
        let name = name.into();
        let mut inner = self.write();
        inner.params.shift_remove(&name);
        let index = index.min(inner.params.len());
        inner.params.shift_insert(index, name, params);
    }

    pub fn get_task_params(&self, name: &str) -> Option<Value> {
        self.read().params.get(name).cloned()
    }

    pub fn remove_task_params(&self, name: &str) {
        self.write().params.shift_remove(name);
    }

    /// All params entries in order.
    pub fn list_task_params(&self) -> Vec<(String, Value)> {
        self.read()
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
