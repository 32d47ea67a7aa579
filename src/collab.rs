//! Traits for external collaborators.
//!
//! The orchestration core talks to the outside world through two seams:
//! `Invoker` executes task payloads (shell bridge, AI backend, whatever the
//! host wires in) and `EventStore` persists the event stream. Everything
//! behind these traits is replaceable without touching the core; tests use
//! scripted invokers and the in-memory store.

use crate::agent::AgentName;
use crate::core::event::{Event, EventBody};
use crate::core::task::{TaskId, TaskPayload, TaskSpec, TaskStatus};
use crate::error::Result;
use crate::workflow::{FailurePolicy, WorkflowId, WorkflowState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;

/// Failure of a single invocation attempt.
///
/// The split drives the executor's retry decision: `Retryable` consumes
/// retry budget, `Terminal` dead-letters the task immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    /// Transient failure; the attempt may be retried.
    #[error("retryable: {0}")]
    Retryable(String),
    /// Permanent rejection; retrying cannot help.
    #[error("terminal: {0}")]
    Terminal(String),
}

/// Executes task payloads on behalf of an agent.
///
/// Implementations must tolerate concurrent calls. The executor wraps every
/// call in its own timeout, so `deadline` is advisory; implementations that
/// can abort early on it should.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        agent: &AgentName,
        payload: &TaskPayload,
        deadline: Duration,
    ) -> std::result::Result<serde_json::Value, InvokeError>;
}

/// Everything needed to reconstruct an in-flight workflow machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub workflow_id: WorkflowId,
    pub state: WorkflowState,
    pub policy: FailurePolicy,
    /// The original task specs; the graph is rebuilt from these.
    pub tasks: Vec<TaskSpec>,
    /// Last observed status per task.
    pub task_statuses: HashMap<TaskId, TaskStatus>,
    /// Tasks whose assignment was already published.
    pub dispatched: HashSet<TaskId>,
}

/// Persists the event stream and answers rehydration queries.
///
/// `record` is fire-and-forget from the core's perspective: a failing store
/// is logged, never blocks orchestration.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn record(&self, event: &Event) -> Result<()>;

    /// Replay the stored stream into a snapshot of one workflow.
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowSnapshot>>;
}

/// In-memory event store, used in tests and as the default wiring.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in publish order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn record(&self, event: &Event) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowSnapshot>> {
        let events = self.events.read().await;
        let mut snapshot: Option<WorkflowSnapshot> = None;

        for event in events
            .iter()
            .filter(|e| e.body.workflow_id() == workflow_id)
        {
            match &event.body {
                EventBody::WorkflowSubmit { tasks, policy, .. } => {
                    snapshot = Some(WorkflowSnapshot {
                        workflow_id,
                        state: WorkflowState::Executing,
                        policy: *policy,
                        tasks: tasks.clone(),
                        task_statuses: tasks
                            .iter()
                            .map(|t| (t.id.clone(), TaskStatus::Pending))
                            .collect(),
                        dispatched: HashSet::new(),
                    });
                }
                EventBody::TaskAssigned { task, .. } => {
                    if let Some(snap) = snapshot.as_mut() {
                        snap.dispatched.insert(task.id.clone());
                        snap.task_statuses
                            .insert(task.id.clone(), TaskStatus::Dispatched);
                    }
                }
                EventBody::TaskStarted { task_id, .. } => {
                    if let Some(snap) = snapshot.as_mut() {
                        snap.task_statuses.insert(task_id.clone(), TaskStatus::Running);
                    }
                }
                EventBody::TaskSucceeded { task_id, .. } => {
                    if let Some(snap) = snapshot.as_mut() {
                        snap.task_statuses
                            .insert(task_id.clone(), TaskStatus::Succeeded);
                    }
                }
                EventBody::TaskFailed { task_id, error, .. }
                | EventBody::TaskDeadLettered { task_id, error, .. } => {
                    if let Some(snap) = snapshot.as_mut() {
                        snap.task_statuses.insert(
                            task_id.clone(),
                            TaskStatus::Failed {
                                error: error.clone(),
                            },
                        );
                    }
                }
                EventBody::TaskSkipped { task_id, .. } => {
                    if let Some(snap) = snapshot.as_mut() {
                        snap.task_statuses.insert(task_id.clone(), TaskStatus::Skipped);
                    }
                }
                EventBody::WorkflowCompleted { .. } => {
                    if let Some(snap) = snapshot.as_mut() {
                        snap.state = WorkflowState::Completed;
                    }
                }
                EventBody::WorkflowFailed { .. } => {
                    if let Some(snap) = snapshot.as_mut() {
                        snap.state = WorkflowState::Failed;
                    }
                }
                EventBody::TaskCancel { .. } | EventBody::WorkflowCancel { .. } => {}
            }
        }

        Ok(snapshot)
    }
}
