//! Core workflow type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a workflow instance.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new unique workflow identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What a workflow does when a task fails permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip every task transitively depending on the failed task and
    /// settle the workflow as soon as nothing is left in flight.
    #[default]
    FailFast,
    /// Keep executing independent branches; only settle once every task
    /// is terminal.
    ContinueOnError,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail_fast"),
            FailurePolicy::ContinueOnError => write!(f, "continue_on_error"),
        }
    }
}

/// Lifecycle states of a workflow execution.
///
/// Created -> Planning -> Executing -> Reviewing -> {Completed | Failed};
/// Failed is also reachable directly from Planning (cyclic graph) and from
/// Executing (fail-fast settle, cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Workflow defined but not yet started.
    Created,
    /// Graph validation in progress.
    Planning,
    /// Ready tasks are being dispatched and executed.
    Executing,
    /// All tasks terminal; outcome being decided.
    Reviewing,
    /// Every task succeeded.
    Completed,
    /// At least one task failed, the graph was invalid, or the workflow
    /// was cancelled.
    Failed,
}

impl WorkflowState {
    /// Check if this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowState::Created => write!(f, "created"),
            WorkflowState::Planning => write!(f, "planning"),
            WorkflowState::Executing => write!(f, "executing"),
            WorkflowState::Reviewing => write!(f, "reviewing"),
            WorkflowState::Completed => write!(f, "completed"),
            WorkflowState::Failed => write!(f, "failed"),
        }
    }
}

/// A record of a state transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    /// The state that was entered.
    pub state: WorkflowState,
    /// When this state was entered.
    pub entered_at: DateTime<Utc>,
}

/// Tracks workflow state and enforces valid transitions.
///
/// Every state change goes through `transition`, which rejects anything
/// outside the lifecycle ordering and records the history of entered states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTracker {
    state: WorkflowState,
    history: Vec<StateHistoryEntry>,
}

impl StateTracker {
    /// Create a tracker starting in `Created`.
    pub fn new() -> Self {
        Self::starting_at(WorkflowState::Created)
    }

    /// Create a tracker starting at an arbitrary state (snapshot rehydration).
    pub fn starting_at(state: WorkflowState) -> Self {
        Self {
            state,
            history: vec![StateHistoryEntry {
                state,
                entered_at: Utc::now(),
            }],
        }
    }

    /// Check if a transition to the target state is valid from the current one.
    pub fn can_transition(&self, target: WorkflowState) -> bool {
        matches!(
            (self.state, target),
            (WorkflowState::Created, WorkflowState::Planning)
                | (WorkflowState::Planning, WorkflowState::Executing)
                | (WorkflowState::Planning, WorkflowState::Failed)
                | (WorkflowState::Executing, WorkflowState::Reviewing)
                | (WorkflowState::Executing, WorkflowState::Failed)
                | (WorkflowState::Reviewing, WorkflowState::Completed)
                | (WorkflowState::Reviewing, WorkflowState::Failed)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition(&mut self, target: WorkflowState) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }

        self.state = target;
        self.history.push(StateHistoryEntry {
            state: target,
            entered_at: Utc::now(),
        });

        Ok(())
    }

    /// The current state.
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// History of all states entered, in order.
    pub fn history(&self) -> &[StateHistoryEntry] {
        &self.history
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
