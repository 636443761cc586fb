//! Completes-before edges between tasks.
//!
//! An edge `dependent -> dependency` means `dependent` may only become ready
//! once `dependency` has completed. Cycles are rejected when an edge is added.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::task::TaskId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("task {0} cannot depend on itself")]
    SelfDependency(TaskId),

    #[error("adding {dependent} -> {dependency} would create a cycle")]
    Cycle { dependent: TaskId, dependency: TaskId },
}

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// task -> tasks it waits on
    dependencies: HashMap<TaskId, HashSet<TaskId>>,
    /// task -> tasks waiting on it
    dependents: HashMap<TaskId, HashSet<TaskId>>,
    /// Tasks that have completed at least once.
    completed: HashSet<TaskId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an edge. Returns `Ok(false)` if it already existed.
    ///
    /// On error the graph is unchanged.
    pub fn add_edge(&mut self, dependent: TaskId, dependency: TaskId) -> Result<bool, GraphError> {
        if dependent == dependency {
            return Err(GraphError::SelfDependency(dependent));
        }
        if self.reaches(dependency, dependent) {
            return Err(GraphError::Cycle {
                dependent,
                dependency,
            });
        }
        let added = self
            .dependencies
            .entry(dependent)
            .or_default()
            .insert(dependency);
        self.dependents
            .entry(dependency)
            .or_default()
            .insert(dependent);
        Ok(added)
    }

    /// Depth-first search along dependency edges from `from`, looking for `target`.
    fn reaches(&self, from: TaskId, target: TaskId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(next) = self.dependencies.get(&node) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Record that `id` completed. Returns the tasks that depend on it.
    pub fn mark_completed(&mut self, id: TaskId) -> Vec<TaskId> {
        self.completed.insert(id);
        self.dependents_of(id)
    }

    pub fn is_completed(&self, id: TaskId) -> bool {
        self.completed.contains(&id)
    }

    /// Whether every dependency of `id` has completed.
    pub fn is_satisfied(&self, id: TaskId) -> bool {
        self.dependencies
            .get(&id)
            .map_or(true, |deps| deps.iter().all(|d| self.completed.contains(d)))
    }

    /// Dependencies of `id` that have not completed yet.
    pub fn unmet(&self, id: TaskId) -> Vec<TaskId> {
        self.dependencies
            .get(&id)
            .map(|deps| {
                deps.iter()
                    .filter(|d| !self.completed.contains(d))
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependencies_of(&self, id: TaskId) -> Vec<TaskId> {
        self.dependencies
            .get(&id)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, id: TaskId) -> Vec<TaskId> {
        self.dependents
            .get(&id)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop the outgoing edges of a retired task. Completion records and
    /// incoming edges are kept so dependents still see the right answer.
    pub fn forget(&mut self, id: TaskId) {
        if let Some(deps) = self.dependencies.remove(&id) {
            for dep in deps {
                if let Some(set) = self.dependents.get_mut(&dep) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.dependents.remove(&dep);
                    }
                }
            }
        }
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(HashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<const N: usize>() -> [TaskId; N] {
        std::array::from_fn(|_| TaskId::new())
    }

    #[test]
    fn satisfied_without_edges() {
        let graph = DependencyGraph::new();
        assert!(graph.is_satisfied(TaskId::new()));
    }

    #[test]
    fn edge_blocks_until_completed() {
        let [a, b] = ids();
        let mut graph = DependencyGraph::new();
        assert_eq!(graph.add_edge(b, a), Ok(true));
        assert!(!graph.is_satisfied(b));
        assert_eq!(graph.unmet(b), vec![a]);

        let unblocked = graph.mark_completed(a);
        assert_eq!(unblocked, vec![b]);
        assert!(graph.is_satisfied(b));
        assert!(graph.unmet(b).is_empty());
    }

    #[test]
    fn duplicate_edge_is_not_new() {
        let [a, b] = ids();
        let mut graph = DependencyGraph::new();
        assert_eq!(graph.add_edge(b, a), Ok(true));
        assert_eq!(graph.add_edge(b, a), Ok(false));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn self_dependency_rejected() {
        let [a] = ids();
        let mut graph = DependencyGraph::new();
        assert_eq!(graph.add_edge(a, a), Err(GraphError::SelfDependency(a)));
    }

    #[test]
    fn direct_cycle_rejected() {
        let [a, b] = ids();
        let mut graph = DependencyGraph::new();
        graph.add_edge(b, a).unwrap();
        assert_eq!(
            graph.add_edge(a, b),
            Err(GraphError::Cycle {
                dependent: a,
                dependency: b
            })
        );
        assert_eq!(graph.edge_count(), 1, "graph must be unchanged");
    }

    #[test]
    fn transitive_cycle_rejected() {
        let [a, b, c, d] = ids();
        let mut graph = DependencyGraph::new();
        graph.add_edge(b, a).unwrap();
        graph.add_edge(c, b).unwrap();
        graph.add_edge(d, c).unwrap();

        assert!(matches!(graph.add_edge(a, d), Err(GraphError::Cycle { .. })));
        // A diamond is fine.
        assert_eq!(graph.add_edge(d, a), Ok(true));
    }

    #[test]
    fn forget_keeps_completion() {
        let [a, b] = ids();
        let mut graph = DependencyGraph::new();
        graph.add_edge(b, a).unwrap();
        graph.mark_completed(a);
        graph.forget(b);

        assert_eq!(graph.edge_count(), 0);
        assert!(graph.dependents_of(a).is_empty());
        assert!(graph.is_completed(a));
    }
}
