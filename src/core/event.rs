//! Event records exchanged over the message bus.
//!
//! Events are the only cross-component coordination mechanism: the workflow
//! state machine publishes assignments, agent runtimes publish outcomes, and
//! every consumer observes the same append-only stream. A published event is
//! never mutated; the bus stamps each one with a monotonically increasing
//! sequence number.

use crate::agent::AgentName;
use crate::core::task::{Task, TaskId};
use crate::workflow::{FailurePolicy, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
///
/// Subscribers use this for duplicate detection: delivery is at-least-once,
/// so an event may be observed twice but never with two different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Create a new unique event identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery priority class.
///
/// High-priority events (cancellations) overtake queued normal events within
/// the bus's bounded look-back window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
        }
    }
}

/// Typed body of an event.
///
/// A closed set of event kinds; nothing outside this enum travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventBody {
    /// A task was assigned to its agent. Carries the full task so the
    /// runtime needs no shared state to execute it.
    TaskAssigned {
        workflow_id: WorkflowId,
        task: Task,
    },
    /// An execution attempt began. Published once per attempt.
    TaskStarted {
        workflow_id: WorkflowId,
        task_id: TaskId,
        attempt: u32,
    },
    /// A task completed successfully.
    TaskSucceeded {
        workflow_id: WorkflowId,
        task_id: TaskId,
        result: serde_json::Value,
        attempts: u32,
    },
    /// A task failed permanently.
    TaskFailed {
        workflow_id: WorkflowId,
        task_id: TaskId,
        error: String,
        attempts: u32,
    },
    /// A task exhausted its retry budget or hit a terminal error.
    /// Consumers treat this exactly as a permanent task failure.
    TaskDeadLettered {
        workflow_id: WorkflowId,
        task_id: TaskId,
        error: String,
        attempts: u32,
    },
    /// A task will never run: an ancestor failed permanently, or the
    /// workflow was halted before the task was dispatched.
    TaskSkipped {
        workflow_id: WorkflowId,
        task_id: TaskId,
    },
    /// Request to interrupt an in-flight task.
    TaskCancel {
        workflow_id: WorkflowId,
        task_id: TaskId,
    },
    /// Synthetic submission event from the presentation collaborator.
    WorkflowSubmit {
        workflow_id: WorkflowId,
        tasks: Vec<crate::core::task::TaskSpec>,
        policy: FailurePolicy,
    },
    /// Synthetic cancellation request from the presentation collaborator.
    WorkflowCancel { workflow_id: WorkflowId },
    /// All tasks succeeded.
    WorkflowCompleted { workflow_id: WorkflowId },
    /// The workflow reached a terminal state with at least one failure.
    WorkflowFailed {
        workflow_id: WorkflowId,
        reason: String,
    },
}

impl EventBody {
    /// The workflow this event belongs to.
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            EventBody::TaskAssigned { workflow_id, .. }
            | EventBody::TaskStarted { workflow_id, .. }
            | EventBody::TaskSucceeded { workflow_id, .. }
            | EventBody::TaskFailed { workflow_id, .. }
            | EventBody::TaskDeadLettered { workflow_id, .. }
            | EventBody::TaskSkipped { workflow_id, .. }
            | EventBody::TaskCancel { workflow_id, .. }
            | EventBody::WorkflowSubmit { workflow_id, .. }
            | EventBody::WorkflowCancel { workflow_id }
            | EventBody::WorkflowCompleted { workflow_id }
            | EventBody::WorkflowFailed { workflow_id, .. } => *workflow_id,
        }
    }

    /// Whether this event records a terminal task or workflow outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventBody::TaskSucceeded { .. }
                | EventBody::TaskFailed { .. }
                | EventBody::TaskDeadLettered { .. }
                | EventBody::TaskSkipped { .. }
                | EventBody::WorkflowCompleted { .. }
                | EventBody::WorkflowFailed { .. }
        )
    }

    /// Short tag used in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            EventBody::TaskAssigned { .. } => "task-assigned",
            EventBody::TaskStarted { .. } => "task-started",
            EventBody::TaskSucceeded { .. } => "task-succeeded",
            EventBody::TaskFailed { .. } => "task-failed",
            EventBody::TaskDeadLettered { .. } => "task-dead-lettered",
            EventBody::TaskSkipped { .. } => "task-skipped",
            EventBody::TaskCancel { .. } => "task-cancel",
            EventBody::WorkflowSubmit { .. } => "workflow-submit",
            EventBody::WorkflowCancel { .. } => "workflow-cancel",
            EventBody::WorkflowCompleted { .. } => "workflow-completed",
            EventBody::WorkflowFailed { .. } => "workflow-failed",
        }
    }
}

/// An immutable record on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Idempotence key; stable across redeliveries.
    pub id: EventId,
    /// Sequence number assigned by the bus at publish time. Zero until
    /// published.
    pub seq: u64,
    /// Delivery priority class.
    pub priority: Priority,
    /// Component that published the event.
    pub source: String,
    /// Agent the event is addressed to, if any.
    pub target: Option<AgentName>,
    /// When the event was published.
    pub published_at: DateTime<Utc>,
    /// Typed body.
    pub body: EventBody,
}

impl Event {
    /// Create an unpublished normal-priority event.
    pub fn new(source: impl Into<String>, body: EventBody) -> Self {
        Self {
            id: EventId::new(),
            seq: 0,
            priority: Priority::Normal,
            source: source.into(),
            target: None,
            published_at: Utc::now(),
            body,
        }
    }

    /// Mark the event high priority.
    pub fn high_priority(mut self) -> Self {
        self.priority = Priority::High;
        self
    }

    /// Address the event to a specific agent.
    pub fn targeted(mut self, agent: AgentName) -> Self {
        self.target = Some(agent);
        self
    }
}
