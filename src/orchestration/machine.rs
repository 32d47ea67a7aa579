//! The per-workflow state machine.
//!
//! One `WorkflowMachine` owns one workflow's lifecycle: it validates the
//! graph, dispatches ready tasks as `task-assigned` events, consumes the
//! outcome events the runtimes publish, propagates skips on failure, and
//! settles the workflow through reviewing into completed or failed. All
//! dependency-driven status transitions happen here and nowhere else.

use crate::bus::{MessageBus, Subscription};
use crate::collab::WorkflowSnapshot;
use crate::core::event::{Event, EventBody};
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::Result;
use crate::workflow::{FailurePolicy, StateTracker, Workflow, WorkflowId, WorkflowState};
use crate::{mlog, mlog_debug, mlog_warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const SOURCE: &str = "machine";

/// Drives one workflow from submission to a terminal state.
pub struct WorkflowMachine {
    workflow: Workflow,
    tracker: StateTracker,
    bus: Arc<MessageBus>,
    /// Tasks whose assignment has been published. Dispatch happens at most
    /// once per task even when duplicate events re-trigger the ready set.
    dispatched: HashSet<TaskId>,
    /// Set by `cancel` or by a fail-fast failure; stops further dispatch.
    halted: bool,
}

impl WorkflowMachine {
    pub fn new(workflow: Workflow, bus: Arc<MessageBus>) -> Self {
        Self {
            workflow,
            tracker: StateTracker::new(),
            bus,
            dispatched: HashSet::new(),
            halted: false,
        }
    }

    /// Rebuild a machine from a persisted snapshot.
    ///
    /// Tasks that were dispatched but not terminal when the snapshot was
    /// taken go back to pending so they are re-assigned; delivery is
    /// at-least-once and the runtimes dedupe.
    pub fn from_snapshot(snapshot: WorkflowSnapshot, bus: Arc<MessageBus>) -> Result<Self> {
        let graph = crate::core::dag::TaskGraph::build(&snapshot.tasks)?;
        graph.validate()?;

        let mut tasks: Vec<Task> = snapshot
            .tasks
            .into_iter()
            .map(Task::from_spec)
            .collect();
        let mut dispatched = snapshot.dispatched;

        for task in tasks.iter_mut() {
            if let Some(status) = snapshot.task_statuses.get(&task.id) {
                task.status = status.clone();
            }
            if !task.is_terminal() {
                task.status = TaskStatus::Pending;
                dispatched.remove(&task.id);
            }
        }

        Ok(Self {
            workflow: Workflow::from_parts(snapshot.workflow_id, tasks, graph, snapshot.policy),
            tracker: StateTracker::starting_at(snapshot.state),
            bus,
            dispatched,
            halted: false,
        })
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow.id
    }

    pub fn state(&self) -> WorkflowState {
        self.tracker.state()
    }

    /// Current status of every task.
    pub fn statuses(&self) -> HashMap<TaskId, TaskStatus> {
        self.workflow
            .tasks
            .iter()
            .map(|(id, task)| (id.clone(), task.status.clone()))
            .collect()
    }

    /// Created -> Planning -> Executing with the initial dispatch.
    ///
    /// A cyclic graph fails the workflow out of Planning with zero tasks
    /// dispatched; the call itself still returns Ok.
    pub fn start(&mut self) -> Result<()> {
        self.tracker.transition(WorkflowState::Planning)?;
        mlog!(
            "machine: workflow {} planning, {} tasks",
            self.workflow.id.short(),
            self.workflow.task_count()
        );

        if let Err(err) = self.workflow.graph.validate() {
            mlog_warn!(
                "machine: workflow {} invalid: {}",
                self.workflow.id.short(),
                err
            );
            self.tracker.transition(WorkflowState::Failed)?;
            self.publish(Event::new(
                SOURCE,
                EventBody::WorkflowFailed {
                    workflow_id: self.workflow.id,
                    reason: err.to_string(),
                },
            ));
            return Ok(());
        }

        self.tracker.transition(WorkflowState::Executing)?;
        self.dispatch_ready();
        self.maybe_review()
    }

    /// Resume a snapshot-restored machine already in Executing.
    ///
    /// Failures recorded in the snapshot are re-propagated first: their
    /// dependents can never run, and no further event will arrive to
    /// settle them.
    pub fn resume(&mut self) -> Result<()> {
        mlog!(
            "machine: workflow {} resuming in state {}",
            self.workflow.id.short(),
            self.state()
        );
        let failed: Vec<TaskId> = self
            .workflow
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
            .map(|t| t.id.clone())
            .collect();
        for id in &failed {
            self.on_permanent_failure(id);
        }
        if !self.halted {
            self.dispatch_ready();
        }
        self.maybe_review()
    }

    /// Consume one bus event.
    ///
    /// Duplicate-safe: outcome events for already-terminal tasks and events
    /// for terminal workflows are ignored.
    pub fn handle_event(&mut self, event: &Event) -> Result<()> {
        if self.state().is_terminal() || event.body.workflow_id() != self.workflow.id {
            return Ok(());
        }

        match &event.body {
            EventBody::TaskStarted { task_id, .. } => {
                if let Some(task) = self.workflow.tasks.get_mut(task_id) {
                    if !task.is_terminal() {
                        task.start();
                    }
                }
                return Ok(());
            }
            EventBody::TaskSucceeded {
                task_id,
                result,
                attempts,
                ..
            } => {
                let Some(task) = self.workflow.tasks.get_mut(task_id) else {
                    return Ok(());
                };
                if task.is_terminal() {
                    mlog_debug!("machine: duplicate outcome for {} ignored", task_id);
                    return Ok(());
                }
                task.succeed(result.clone(), *attempts);
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
                let Some(task) = self.workflow.tasks.get_mut(task_id) else {
                    return Ok(());
                };
                if task.is_terminal() {
                    mlog_debug!("machine: duplicate outcome for {} ignored", task_id);
                    return Ok(());
                }
                task.fail(error, *attempts);
                self.on_permanent_failure(task_id);
            }
            EventBody::WorkflowCancel { .. } => {
                self.cancel();
            }
            // Assignments (our own), cancels we published, and submissions
            // are not state inputs.
            _ => return Ok(()),
        }

        if !self.halted {
            self.dispatch_ready();
        }
        self.maybe_review()
    }

    /// Stop dispatching, cancel in-flight tasks, skip everything not yet
    /// dispatched.
    pub fn cancel(&mut self) {
        if self.state().is_terminal() || self.halted {
            return;
        }
        mlog!("machine: workflow {} cancelled", self.workflow.id.short());
        self.halted = true;

        let mut cancels = Vec::new();
        let mut skipped = Vec::new();
        for task in self.workflow.tasks.values_mut() {
            match task.status {
                TaskStatus::Dispatched | TaskStatus::Running => {
                    cancels.push((task.id.clone(), task.agent.clone()));
                }
                TaskStatus::Pending | TaskStatus::Ready => {
                    task.skip();
                    skipped.push(task.id.clone());
                }
                _ => {}
            }
        }
        self.publish_skips(skipped);
        for (task_id, agent) in cancels {
            self.publish(
                Event::new(
                    SOURCE,
                    EventBody::TaskCancel {
                        workflow_id: self.workflow.id,
                        task_id,
                    },
                )
                .high_priority()
                .targeted(agent),
            );
        }
    }

    /// Run as an actor: consume the subscription until terminal.
    ///
    /// The subscription should be workflow-filtered and must have been
    /// created before `run` is called so no outcome is missed.
    pub async fn run(mut self, mut subscription: Subscription) -> Result<WorkflowState> {
        if self.state() == WorkflowState::Created {
            self.start()?;
        } else if !self.state().is_terminal() {
            self.resume()?;
        }

        while !self.state().is_terminal() {
            match subscription.recv().await {
                Some(event) => self.handle_event(&event)?,
                None => {
                    mlog_warn!(
                        "machine: bus closed with workflow {} in state {}",
                        self.workflow.id.short(),
                        self.state()
                    );
                    break;
                }
            }
        }
        Ok(self.state())
    }

    /// Skip propagation after a permanent failure.
    ///
    /// Dependents of the failed task can never run under either policy.
    /// Under fail-fast the whole workflow additionally stops dispatching
    /// and pending independent branches are skipped too.
    fn on_permanent_failure(&mut self, failed: &TaskId) {
        let mut skipped = Vec::new();
        let downstream = self.workflow.graph.downstream(failed);
        for id in &downstream {
            if let Some(task) = self.workflow.tasks.get_mut(id) {
                if !task.is_terminal() {
                    task.skip();
                    skipped.push(id.clone());
                }
            }
        }

        if self.workflow.policy == FailurePolicy::FailFast {
            self.halted = true;
            for task in self.workflow.tasks.values_mut() {
                if matches!(task.status, TaskStatus::Pending | TaskStatus::Ready) {
                    task.skip();
                    skipped.push(task.id.clone());
                }
            }
        }
        self.publish_skips(skipped);
    }

    /// Every skip goes on the bus so the final report accounts for tasks
    /// that never ran.
    fn publish_skips(&self, skipped: Vec<TaskId>) {
        for task_id in skipped {
            self.publish(Event::new(
                SOURCE,
                EventBody::TaskSkipped {
                    workflow_id: self.workflow.id,
                    task_id,
                },
            ));
        }
    }

    /// Publish assignments for every newly ready task.
    fn dispatch_ready(&mut self) {
        let ready = self.workflow.graph.ready_set(&self.statuses());
        for id in ready {
            if self.dispatched.contains(&id) {
                continue;
            }
            let Some(task) = self.workflow.tasks.get_mut(&id) else {
                continue;
            };
            task.mark_ready();
            task.mark_dispatched();
            self.dispatched.insert(id.clone());

            let assignment = Event::new(
                SOURCE,
                EventBody::TaskAssigned {
                    workflow_id: self.workflow.id,
                    task: self.workflow.tasks[&id].clone(),
                },
            )
            .targeted(self.workflow.tasks[&id].agent.clone());
            mlog_debug!(
                "machine: dispatch {} -> {}",
                id,
                self.workflow.tasks[&id].agent
            );
            self.publish(assignment);
        }
    }

    /// Settle the workflow once nothing is left in flight.
    fn maybe_review(&mut self) -> Result<()> {
        if self.state() != WorkflowState::Executing {
            return Ok(());
        }
        let all_settled = self.workflow.tasks.values().all(|t| t.is_terminal());
        if !all_settled {
            return Ok(());
        }

        self.tracker.transition(WorkflowState::Reviewing)?;
        let all_succeeded = self
            .workflow
            .tasks
            .values()
            .all(|t| t.status == TaskStatus::Succeeded);

        if all_succeeded {
            self.tracker.transition(WorkflowState::Completed)?;
            mlog!("machine: workflow {} completed", self.workflow.id.short());
            self.publish(Event::new(
                SOURCE,
                EventBody::WorkflowCompleted {
                    workflow_id: self.workflow.id,
                },
            ));
        } else {
            let failures: Vec<String> = self
                .workflow
                .tasks
                .values()
                .filter_map(|t| match &t.status {
                    TaskStatus::Failed { error } => Some(format!("{}: {}", t.id, error)),
                    _ => None,
                })
                .collect();
            let reason = if failures.is_empty() {
                "cancelled".to_string()
            } else {
                failures.join("; ")
            };
            self.tracker.transition(WorkflowState::Failed)?;
            mlog!(
                "machine: workflow {} failed: {}",
                self.workflow.id.short(),
                reason
            );
            self.publish(Event::new(
                SOURCE,
                EventBody::WorkflowFailed {
                    workflow_id: self.workflow.id,
                    reason,
                },
            ));
        }
        Ok(())
    }

    // Losing an event because the bus is shutting down is not recoverable
    // from inside the machine; log it and let the settle logic run on
    // whatever still arrives.
    fn publish(&self, event: Event) {
        if let Err(err) = self.bus.publish(event) {
            mlog_warn!(
                "machine: publish failed for workflow {}: {}",
                self.workflow.id.short(),
                err
            );
        }
    }
}
