//! Workflow submissions and their synchronous validation.
//!
//! A submission is a list of task specs plus a failure policy. It is
//! accepted whole or rejected whole: duplicate ids, references to unknown
//! tasks, and dependency cycles all fail validation before any workflow
//! state exists.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::dag::TaskGraph;
use crate::core::task::{Task, TaskId, TaskSpec};
use crate::error::Result;
use crate::workflow::{FailurePolicy, WorkflowId};

/// A caller-provided workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSubmission {
    /// Identifier for the workflow; generated if the caller does not care.
    #[serde(default)]
    pub workflow_id: WorkflowId,
    /// The tasks and their dependency edges.
    pub tasks: Vec<TaskSpec>,
    /// What to do when a task fails permanently.
    #[serde(default)]
    pub policy: FailurePolicy,
}

impl WorkflowSubmission {
    /// Create a submission with a fresh workflow id.
    pub fn new(tasks: Vec<TaskSpec>, policy: FailurePolicy) -> Self {
        Self {
            workflow_id: WorkflowId::new(),
            tasks,
            policy,
        }
    }

    /// Validate the submission and build its dependency graph.
    ///
    /// Rejects duplicate task ids, `depends_on` references to unknown
    /// ids, and cyclic graphs. Nothing is partially accepted: an error
    /// here means no workflow was created.
    pub fn validate(&self) -> Result<TaskGraph> {
        let graph = TaskGraph::build(&self.tasks)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Validate and materialize the workflow.
    pub fn into_workflow(self) -> Result<Workflow> {
        let graph = self.validate()?;
        Ok(Workflow::from_parts(
            self.workflow_id,
            self.tasks.into_iter().map(Task::from_spec).collect(),
            graph,
            self.policy,
        ))
    }
}

/// A validated workflow: tasks, graph, and failure policy.
///
/// The graph is read-only after validation; task state is owned by the
/// components responsible for each transition.
#[derive(Debug)]
pub struct Workflow {
    /// Workflow identifier.
    pub id: WorkflowId,
    /// Tasks indexed by id.
    pub tasks: HashMap<TaskId, Task>,
    /// The dependency graph.
    pub graph: TaskGraph,
    /// Failure policy.
    pub policy: FailurePolicy,
}

impl Workflow {
    /// Assemble a workflow from already-built parts.
    ///
    /// Used by `WorkflowSubmission::into_workflow` and by snapshot
    /// rehydration; the graph is not re-validated here.
    pub fn from_parts(
        id: WorkflowId,
        tasks: Vec<Task>,
        graph: TaskGraph,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            id,
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            graph,
            policy,
        }
    }

    /// Number of tasks in the workflow.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}
