//! Task dependency graph and the ready-set resolver.
//!
//! The graph is built once from a workflow submission and is read-only
//! afterwards. Nodes are task ids; an edge a -> b means b depends on a.
//! The resolver functions here are pure: they take the current status map
//! and return answers without touching any other state.

use crate::core::task::{TaskId, TaskSpec, TaskStatus};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// The task dependency graph.
///
/// Uses petgraph's DiGraph for storage with an id index for fast lookups,
/// plus per-task dispatch priorities for ready-set ordering.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// The underlying directed graph; edge a -> b means b depends on a.
    graph: DiGraph<TaskId, ()>,
    /// Index mapping from TaskId to NodeIndex.
    index: HashMap<TaskId, NodeIndex>,
    /// Dispatch priority per task (higher dispatches first).
    priority: HashMap<TaskId, i64>,
}

impl TaskGraph {
    /// Build a graph from submission specs.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTask` if two specs share an id, or
    /// `UnknownDependency` if a `depends_on` entry references an id that
    /// is not in the submission. Cycles are caught by `validate`.
    pub fn build(specs: &[TaskSpec]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut priority = HashMap::new();

        for spec in specs {
            if index.contains_key(&spec.id) {
                return Err(Error::DuplicateTask(spec.id.clone()));
            }
            let node = graph.add_node(spec.id.clone());
            index.insert(spec.id.clone(), node);
            priority.insert(spec.id.clone(), spec.priority);
        }

        for spec in specs {
            let to = index[&spec.id];
            for dep in &spec.depends_on {
                let from = *index.get(dep).ok_or_else(|| Error::UnknownDependency {
                    task: spec.id.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(from, to, ());
            }
        }

        Ok(Self {
            graph,
            index,
            priority,
        })
    }

    /// Check the graph is acyclic.
    ///
    /// Depth-first traversal tracking recursion-stack membership; a node
    /// revisited while still on the stack yields `CyclicDependency` naming
    /// every task on the cycle, closed with a repeat of the entry task.
    pub fn validate(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: HashMap<NodeIndex, Mark> = HashMap::new();

        // Iterative DFS with an explicit path so the cycle can be named.
        for start in self.graph.node_indices() {
            if marks.contains_key(&start) {
                continue;
            }

            let mut path: Vec<NodeIndex> = Vec::new();
            // (node, entered) pairs; a node is pushed once to enter and
            // once to leave.
            let mut stack: Vec<(NodeIndex, bool)> = vec![(start, false)];

            while let Some((node, leaving)) = stack.pop() {
                if leaving {
                    path.pop();
                    marks.insert(node, Mark::Done);
                    continue;
                }
                if marks.get(&node) == Some(&Mark::Done) {
                    continue;
                }
                marks.insert(node, Mark::InProgress);
                path.push(node);
                stack.push((node, true));

                for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    match marks.get(&next) {
                        Some(Mark::InProgress) => {
                            let from = path
                                .iter()
                                .position(|&n| n == next)
                                .unwrap_or(0);
                            let mut cycle: Vec<TaskId> = path[from..]
                                .iter()
                                .map(|&n| self.graph[n].clone())
                                .collect();
                            cycle.push(self.graph[next].clone());
                            return Err(Error::CyclicDependency { cycle });
                        }
                        Some(Mark::Done) => {}
                        None => stack.push((next, false)),
                    }
                }
            }
        }

        Ok(())
    }

    /// The set of tasks that can be dispatched right now.
    ///
    /// A task is ready when its status is `Pending` and every dependency
    /// is `Succeeded`. The result is ordered by (priority descending,
    /// id ascending) so simultaneous readiness dispatches deterministically.
    pub fn ready_set(&self, statuses: &HashMap<TaskId, TaskStatus>) -> Vec<TaskId> {
        let mut ready: Vec<TaskId> = self
            .graph
            .node_indices()
            .filter(|&node| {
                let id = &self.graph[node];
                if statuses.get(id) != Some(&TaskStatus::Pending) {
                    return false;
                }
                self.graph
                    .neighbors_directed(node, Direction::Incoming)
                    .all(|dep| statuses.get(&self.graph[dep]) == Some(&TaskStatus::Succeeded))
            })
            .map(|node| self.graph[node].clone())
            .collect();

        ready.sort_by(|a, b| {
            let pa = self.priority.get(a).copied().unwrap_or(0);
            let pb = self.priority.get(b).copied().unwrap_or(0);
            pb.cmp(&pa).then_with(|| a.cmp(b))
        });
        ready
    }

    /// Every task transitively depending on `id` (not including `id`).
    pub fn downstream(&self, id: &TaskId) -> HashSet<TaskId> {
        let mut result = HashSet::new();
        let Some(&start) = self.index.get(id) else {
            return result;
        };

        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if result.insert(self.graph[next].clone()) {
                    stack.push(next);
                }
            }
        }
        result
    }

    /// Direct dependencies of a task.
    pub fn dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        match self.index.get(id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|dep| self.graph[dep].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Check if the graph contains a task.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of dependency edges in the graph.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskPayload;

    fn spec(id: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec::new(
            id,
            "builder",
            TaskPayload::Command {
                command: format!("run {}", id),
            },
        )
        .with_deps(deps)
    }

    fn statuses(pairs: &[(&str, TaskStatus)]) -> HashMap<TaskId, TaskStatus> {
        pairs
            .iter()
            .map(|(id, s)| (TaskId::from(*id), s.clone()))
            .collect()
    }

    fn all_pending(ids: &[&str]) -> HashMap<TaskId, TaskStatus> {
        ids.iter()
            .map(|id| (TaskId::from(*id), TaskStatus::Pending))
            .collect()
    }

    // Build tests

    #[test]
    fn test_build_counts() {
        let graph =
            TaskGraph::build(&[spec("a", &[]), spec("b", &["a"]), spec("c", &["a", "b"])]).unwrap();
        assert_eq!(graph.task_count(), 3);
        assert_eq!(graph.dependency_count(), 3);
        assert!(graph.contains(&TaskId::from("a")));
        assert!(!graph.contains(&TaskId::from("z")));
    }

    #[test]
    fn test_build_rejects_duplicate() {
        let err = TaskGraph::build(&[spec("a", &[]), spec("a", &[])]).unwrap_err();
        assert!(matches!(err, Error::DuplicateTask(ref id) if id == &TaskId::from("a")));
    }

    #[test]
    fn test_build_rejects_unknown_dependency() {
        let err = TaskGraph::build(&[spec("a", &["ghost"])]).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownDependency { ref task, ref dependency }
                if task == &TaskId::from("a") && dependency == &TaskId::from("ghost")
        ));
    }

    // Cycle detection tests

    #[test]
    fn test_validate_acyclic() {
        let graph =
            TaskGraph::build(&[spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])]).unwrap();
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_graph() {
        let graph = TaskGraph::build(&[]).unwrap();
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_validate_self_cycle() {
        let graph = TaskGraph::build(&[spec("a", &["a"])]).unwrap();
        let err = graph.validate().unwrap_err();
        match err {
            Error::CyclicDependency { cycle } => {
                assert!(cycle.contains(&TaskId::from("a")));
            }
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_two_cycle_names_both_tasks() {
        let graph = TaskGraph::build(&[spec("a", &["b"]), spec("b", &["a"])]).unwrap();
        let err = graph.validate().unwrap_err();
        match err {
            Error::CyclicDependency { cycle } => {
                assert!(cycle.contains(&TaskId::from("a")));
                assert!(cycle.contains(&TaskId::from("b")));
                // Closed walk: first and last entries match.
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_long_cycle_behind_valid_prefix() {
        // a -> b -> c -> d -> b
        let graph = TaskGraph::build(&[
            spec("a", &[]),
            spec("b", &["a", "d"]),
            spec("c", &["b"]),
            spec("d", &["c"]),
        ])
        .unwrap();
        let err = graph.validate().unwrap_err();
        match err {
            Error::CyclicDependency { cycle } => {
                for id in ["b", "c", "d"] {
                    assert!(cycle.contains(&TaskId::from(id)), "missing {}", id);
                }
                assert!(!cycle.contains(&TaskId::from("a")));
            }
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    // Ready-set tests

    #[test]
    fn test_ready_set_independent_tasks() {
        let graph = TaskGraph::build(&[spec("a", &[]), spec("b", &[]), spec("c", &[])]).unwrap();
        let ready = graph.ready_set(&all_pending(&["a", "b", "c"]));
        assert_eq!(
            ready,
            vec![TaskId::from("a"), TaskId::from("b"), TaskId::from("c")]
        );
    }

    #[test]
    fn test_ready_set_blocked_by_dependency() {
        let graph = TaskGraph::build(&[spec("a", &[]), spec("b", &["a"])]).unwrap();
        let ready = graph.ready_set(&all_pending(&["a", "b"]));
        assert_eq!(ready, vec![TaskId::from("a")]);
    }

    #[test]
    fn test_ready_set_after_dependency_succeeds() {
        let graph = TaskGraph::build(&[spec("a", &[]), spec("b", &["a"]), spec("c", &["a"])])
            .unwrap();
        let ready = graph.ready_set(&statuses(&[
            ("a", TaskStatus::Succeeded),
            ("b", TaskStatus::Pending),
            ("c", TaskStatus::Pending),
        ]));
        assert_eq!(ready, vec![TaskId::from("b"), TaskId::from("c")]);
    }

    #[test]
    fn test_ready_set_failed_dependency_blocks() {
        let graph = TaskGraph::build(&[spec("a", &[]), spec("b", &["a"])]).unwrap();
        let ready = graph.ready_set(&statuses(&[
            (
                "a",
                TaskStatus::Failed {
                    error: "x".to_string(),
                },
            ),
            ("b", TaskStatus::Pending),
        ]));
        assert!(ready.is_empty());
    }

    #[test]
    fn test_ready_set_excludes_non_pending() {
        let graph = TaskGraph::build(&[spec("a", &[]), spec("b", &[])]).unwrap();
        let ready = graph.ready_set(&statuses(&[
            ("a", TaskStatus::Dispatched),
            ("b", TaskStatus::Pending),
        ]));
        assert_eq!(ready, vec![TaskId::from("b")]);
    }

    #[test]
    fn test_ready_set_priority_ordering() {
        let graph = TaskGraph::build(&[
            spec("low", &[]).with_priority(1),
            spec("high", &[]).with_priority(10),
            spec("mid", &[]).with_priority(5),
        ])
        .unwrap();
        let ready = graph.ready_set(&all_pending(&["low", "high", "mid"]));
        assert_eq!(
            ready,
            vec![TaskId::from("high"), TaskId::from("mid"), TaskId::from("low")]
        );
    }

    #[test]
    fn test_ready_set_equal_priority_breaks_ties_by_id() {
        let graph = TaskGraph::build(&[
            spec("zeta", &[]).with_priority(3),
            spec("alpha", &[]).with_priority(3),
        ])
        .unwrap();
        let ready = graph.ready_set(&all_pending(&["zeta", "alpha"]));
        assert_eq!(ready, vec![TaskId::from("alpha"), TaskId::from("zeta")]);
    }

    #[test]
    fn test_every_task_becomes_ready_exactly_once() {
        // Drive the graph to completion, collecting ready tasks as they
        // appear; every task must show up exactly once.
        let graph = TaskGraph::build(&[
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["a"]),
            spec("d", &["b", "c"]),
        ])
        .unwrap();

        let mut statuses = all_pending(&["a", "b", "c", "d"]);
        let mut seen: Vec<TaskId> = Vec::new();

        loop {
            let ready = graph.ready_set(&statuses);
            if ready.is_empty() {
                break;
            }
            for id in ready {
                assert!(!seen.contains(&id), "{} became ready twice", id);
                seen.push(id.clone());
                statuses.insert(id, TaskStatus::Succeeded);
            }
        }

        assert_eq!(seen.len(), 4);
        assert!(statuses.values().all(|s| *s == TaskStatus::Succeeded));
    }

    // Downstream tests

    #[test]
    fn test_downstream_transitive() {
        let graph = TaskGraph::build(&[
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["b"]),
            spec("d", &[]),
        ])
        .unwrap();
        let down = graph.downstream(&TaskId::from("a"));
        assert_eq!(down.len(), 2);
        assert!(down.contains(&TaskId::from("b")));
        assert!(down.contains(&TaskId::from("c")));
        assert!(!down.contains(&TaskId::from("d")));
    }

    #[test]
    fn test_downstream_leaf_is_empty() {
        let graph = TaskGraph::build(&[spec("a", &[]), spec("b", &["a"])]).unwrap();
        assert!(graph.downstream(&TaskId::from("b")).is_empty());
    }

    #[test]
    fn test_downstream_unknown_task() {
        let graph = TaskGraph::build(&[spec("a", &[])]).unwrap();
        assert!(graph.downstream(&TaskId::from("ghost")).is_empty());
    }

    #[test]
    fn test_dependencies() {
        let graph = TaskGraph::build(&[spec("a", &[]), spec("b", &[]), spec("c", &["a", "b"])])
            .unwrap();
        let mut deps = graph.dependencies(&TaskId::from("c"));
        deps.sort();
        assert_eq!(deps, vec![TaskId::from("a"), TaskId::from("b")]);
        assert!(graph.dependencies(&TaskId::from("a")).is_empty());
    }
}
