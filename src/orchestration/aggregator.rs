//! Collects terminal outcomes into per-workflow reports.
//!
//! The aggregator is a passive observer: it subscribes to terminal events
//! and answers `report` queries. It never feeds back into orchestration, so
//! a missing entry in a partial report means "not finished yet", never
//! "failed".

use crate::bus::{EventFilter, MessageBus};
use crate::core::event::{Event, EventBody};
use crate::core::task::{TaskId, TaskStatus};
use crate::workflow::{WorkflowId, WorkflowState};
use crate::mlog_debug;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Final outcome of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Snapshot of a workflow's results.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub workflow_id: WorkflowId,
    /// Terminal state once `complete`; `Executing` for partial snapshots.
    pub status: WorkflowState,
    /// False while the workflow is still running; absent task entries in a
    /// partial report are tasks that have not settled.
    pub complete: bool,
    pub outcomes: HashMap<TaskId, TaskOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct WorkflowRecord {
    outcomes: HashMap<TaskId, TaskOutcome>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    /// Set when the workflow terminal event arrives; freezes the record.
    terminal: Option<WorkflowState>,
}

/// Accumulates terminal events per workflow.
#[derive(Debug)]
pub struct ResultAggregator {
    workflows: Mutex<HashMap<WorkflowId, WorkflowRecord>>,
    /// Bumped every time a workflow reaches a terminal state, so waiters
    /// can wake and re-check their report.
    terminal_seen: watch::Sender<u64>,
}

impl ResultAggregator {
    pub fn new() -> Arc<Self> {
        let (terminal_seen, _) = watch::channel(0);
        Arc::new(Self {
            workflows: Mutex::new(HashMap::new()),
            terminal_seen,
        })
    }

    /// Watch for workflow-terminal observations.
    ///
    /// By the time the value changes for a given workflow, every earlier
    /// task outcome for it has been folded in: the observer loop consumes
    /// its subscription in sequence order.
    pub fn watch_terminals(&self) -> watch::Receiver<u64> {
        self.terminal_seen.subscribe()
    }

    /// Subscribe to terminal events and spawn the observer loop.
    pub fn start(self: Arc<Self>, bus: &MessageBus) -> JoinHandle<()> {
        let mut subscription = bus.subscribe(EventFilter::Terminal);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                self.observe(&event);
            }
            // Wake waiters so nobody blocks on a closed bus.
            self.terminal_seen.send_modify(|n| *n += 1);
        })
    }

    /// Fold one event into the record set.
    pub fn observe(&self, event: &Event) {
        let workflow_id = event.body.workflow_id();
        let workflow_terminal = matches!(
            event.body,
            EventBody::WorkflowCompleted { .. } | EventBody::WorkflowFailed { .. }
        );
        let mut workflows = self.lock();
        let record = workflows.entry(workflow_id).or_default();

        if record.started_at.is_none() {
            record.started_at = Some(event.published_at);
        }

        match &event.body {
            EventBody::WorkflowCompleted { .. } => {
                record.terminal = Some(WorkflowState::Completed);
                record.finished_at = Some(event.published_at);
            }
            EventBody::WorkflowFailed { .. } => {
                record.terminal = Some(WorkflowState::Failed);
                record.finished_at = Some(event.published_at);
            }
            _ if record.terminal.is_some() => {
                // Frozen; stray late outcomes are dropped.
                mlog_debug!(
                    "aggregator: late event {} for frozen workflow {}",
                    event.body.tag(),
                    workflow_id.short()
                );
            }
            EventBody::TaskSucceeded {
                task_id,
                result,
                attempts,
                ..
            } => {
                record.outcomes.insert(
                    task_id.clone(),
                    TaskOutcome {
                        status: TaskStatus::Succeeded,
                        result: Some(result.clone()),
                        error: None,
                        attempts: *attempts,
                    },
                );
            }
            EventBody::TaskFailed {
                task_id,
                error,
                attempts,
                ..
            }
            | EventBody::TaskDeadLettered {
                task_id,
                error,
                attempts,
                ..
            } => {
                record.outcomes.insert(
                    task_id.clone(),
                    TaskOutcome {
                        status: TaskStatus::Failed {
                            error: error.clone(),
                        },
                        result: None,
                        error: Some(error.clone()),
                        attempts: *attempts,
                    },
                );
            }
            EventBody::TaskSkipped { task_id, .. } => {
                record.outcomes.insert(
                    task_id.clone(),
                    TaskOutcome {
                        status: TaskStatus::Skipped,
                        result: None,
                        error: None,
                        attempts: 0,
                    },
                );
            }
            _ => {}
        }
        drop(workflows);

        if workflow_terminal {
            self.terminal_seen.send_modify(|n| *n += 1);
        }
    }

    /// Report for a workflow; `None` if no event was ever observed for it.
    pub fn report(&self, workflow_id: WorkflowId) -> Option<WorkflowReport> {
        let workflows = self.lock();
        let record = workflows.get(&workflow_id)?;
        Some(WorkflowReport {
            workflow_id,
            status: record.terminal.unwrap_or(WorkflowState::Executing),
            complete: record.terminal.is_some(),
            outcomes: record.outcomes.clone(),
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WorkflowId, WorkflowRecord>> {
        match self.workflows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
