//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of work assigned to agents. Each task tracks
//! its status, target agent, dependencies, retry budget, and results.

use crate::agent::AgentName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier for a task within a workflow.
///
/// Task ids are caller-supplied strings from the workflow submission, which
/// lets `depends_on` lists reference siblings by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task status in its lifecycle.
///
/// Dependency-driven transitions (pending -> ready -> dispatched, and
/// -> skipped) belong to the workflow state machine; execution-driven
/// transitions (running -> succeeded/failed) belong to the task executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created, dependencies not yet satisfied.
    Pending,
    /// Dependencies satisfied, selected for dispatch.
    Ready,
    /// Assignment published on the bus, not yet picked up.
    Dispatched,
    /// An agent runtime is executing the task.
    Running,
    /// Task completed successfully.
    Succeeded,
    /// Task failed permanently (retries exhausted, terminal error, or cancelled).
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Task skipped because an ancestor failed under fail-fast policy.
    Skipped,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Check if this status is terminal (succeeded, failed, or skipped).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } | TaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Dispatched => write!(f, "dispatched"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// The work a task carries to its agent.
///
/// A closed set of payload kinds, each resolved to a concrete handler at the
/// agent runtime boundary. Keeping this an enum (rather than a string-keyed
/// lookup) makes dispatch exhaustiveness checkable at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskPayload {
    /// A shell-style command line for the execution collaborator.
    Command {
        /// The command to run.
        command: String,
    },
    /// A natural-language prompt for an AI-backed agent.
    Prompt {
        /// The prompt text.
        prompt: String,
    },
    /// Opaque structured input interpreted by the agent.
    Data {
        /// Arbitrary JSON value.
        value: serde_json::Value,
    },
}

/// Submission record for a single task.
///
/// This is the wire shape callers use to define a workflow: id, target
/// agent, payload, dependencies, retry budget, per-attempt timeout, and
/// dispatch priority (higher dispatches first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Identifier, unique within the workflow.
    pub id: TaskId,
    /// Name of the agent that executes this task.
    pub agent: AgentName,
    /// Input payload.
    pub payload: TaskPayload,
    /// Ids of tasks that must succeed before this task runs.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Maximum number of retries after the first attempt.
    #[serde(default)]
    pub max_retries: u32,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Dispatch priority; higher values dispatch first.
    #[serde(default)]
    pub priority: i64,
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl TaskSpec {
    /// Create a spec with defaults (no deps, no retries, 60s timeout).
    pub fn new(id: impl Into<TaskId>, agent: impl Into<AgentName>, payload: TaskPayload) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            payload,
            depends_on: Vec::new(),
            max_retries: 0,
            timeout_ms: default_timeout_ms(),
            priority: 0,
        }
    }

    pub fn with_deps(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| TaskId::from(*d)).collect();
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// A single task in a workflow.
///
/// Immutable after creation except for status, attempts, result and error,
/// which are written by the components that own those transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, unique within the workflow.
    pub id: TaskId,
    /// Name of the agent that executes this task.
    pub agent: AgentName,
    /// Input payload.
    pub payload: TaskPayload,
    /// Ids of tasks that must succeed before this task runs.
    pub depends_on: Vec<TaskId>,
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Dispatch priority; higher values dispatch first.
    pub priority: i64,
    /// Current execution status.
    pub status: TaskStatus,
    /// Result value written once on success.
    pub result: Option<serde_json::Value>,
    /// Error message written once on permanent failure.
    pub error: Option<String>,
    /// Number of execution attempts made so far.
    pub attempts: u32,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started its first attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task from its submission spec with Pending status.
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            id: spec.id,
            agent: spec.agent,
            payload: spec.payload,
            depends_on: spec.depends_on,
            max_retries: spec.max_retries,
            timeout_ms: spec.timeout_ms,
            priority: spec.priority,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Per-attempt timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Mark the task ready for dispatch.
    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    /// Mark the task dispatched on the bus.
    pub fn mark_dispatched(&mut self) {
        self.status = TaskStatus::Dispatched;
    }

    /// Mark the task running and record the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Mark the task succeeded with its result value.
    pub fn succeed(&mut self, result: serde_json::Value, attempts: u32) {
        self.status = TaskStatus::Succeeded;
        self.result = Some(result);
        self.attempts = attempts;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the task permanently failed.
    pub fn fail(&mut self, error: &str, attempts: u32) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.error = Some(error.to_string());
        self.attempts = attempts;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the task skipped (failed ancestor under fail-fast).
    pub fn skip(&mut self) {
        self.status = TaskStatus::Skipped;
        self.finished_at = Some(Utc::now());
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
