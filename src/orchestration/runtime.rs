//! Per-agent execution runtime.
//!
//! One runtime serves one agent name. It consumes assignments targeted at
//! that name, bounds concurrency with a worker pool, guarantees at-most-one
//! concurrent execution per task id, routes cancel events to the matching
//! in-flight token, and publishes the terminal outcome of every execution.

use crate::agent::AgentName;
use crate::bus::{EventFilter, MessageBus};
use crate::collab::Invoker;
use crate::core::event::{Event, EventBody};
use crate::core::task::{Task, TaskId};
use crate::orchestration::executor::{Outcome, RetryPolicy, TaskExecutor};
use crate::workflow::WorkflowId;
use crate::{mlog, mlog_debug, mlog_warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How hard the runtime tries to get a terminal outcome onto the bus.
const OUTCOME_PUBLISH_ATTEMPTS: u32 = 3;
const OUTCOME_PUBLISH_BASE_DELAY: Duration = Duration::from_millis(50);

/// Executes assignments for a single agent name.
pub struct AgentRuntime {
    name: AgentName,
    bus: Arc<MessageBus>,
    executor: TaskExecutor,
    workers: Arc<Semaphore>,
    /// Cancellation token per task currently accepted and not yet settled.
    /// A task settles only after its outcome is on the bus.
    in_flight: Mutex<HashMap<TaskId, CancellationToken>>,
    /// Mirrors the size of `in_flight`; `drain` waits for it to hit zero.
    in_flight_watch: watch::Sender<usize>,
    draining: AtomicBool,
}

impl AgentRuntime {
    pub fn new(
        name: AgentName,
        bus: Arc<MessageBus>,
        invoker: Arc<dyn Invoker>,
        policy: RetryPolicy,
        workers: usize,
    ) -> Arc<Self> {
        let source = format!("runtime:{}", name);
        let (in_flight_watch, _) = watch::channel(0);
        Arc::new(Self {
            executor: TaskExecutor::new(Arc::clone(&bus), invoker, policy, source),
            name,
            bus,
            workers: Arc::new(Semaphore::new(workers)),
            in_flight: Mutex::new(HashMap::new()),
            in_flight_watch,
            draining: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &AgentName {
        &self.name
    }

    /// Subscribe and spawn the accept loop.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut subscription = self
            .bus
            .subscribe(EventFilter::AssignedTo(self.name.clone()));
        tokio::spawn(async move {
            mlog!("runtime:{}: accepting assignments", self.name);
            while let Some(event) = subscription.recv().await {
                if let Some((workflow_id, task, cancel)) = self.handle(event) {
                    let runtime = Arc::clone(&self);
                    tokio::spawn(async move {
                        runtime.execute_assignment(workflow_id, task, cancel).await;
                    });
                }
            }
            mlog!("runtime:{}: subscription closed", self.name);
        })
    }

    /// Route one event; returns an accepted assignment to be executed.
    fn handle(&self, event: Event) -> Option<(WorkflowId, Task, CancellationToken)> {
        match event.body {
            EventBody::TaskAssigned { workflow_id, task } => self.accept(workflow_id, task),
            EventBody::TaskCancel { task_id, .. } => {
                let in_flight = self.lock_in_flight();
                match in_flight.get(&task_id) {
                    Some(token) => {
                        mlog!("runtime:{}: cancelling {}", self.name, task_id);
                        token.cancel();
                    }
                    None => {
                        mlog_debug!(
                            "runtime:{}: cancel for {} with nothing in flight",
                            self.name,
                            task_id
                        );
                    }
                }
                None
            }
            _ => None,
        }
    }

    fn accept(
        &self,
        workflow_id: WorkflowId,
        task: Task,
    ) -> Option<(WorkflowId, Task, CancellationToken)> {
        if self.draining.load(Ordering::SeqCst) {
            mlog_warn!(
                "runtime:{}: draining, dropping assignment {}",
                self.name,
                task.id
            );
            return None;
        }

        let mut in_flight = self.lock_in_flight();
        if in_flight.contains_key(&task.id) {
            mlog_warn!(
                "runtime:{}: duplicate assignment for {} dropped",
                self.name,
                task.id
            );
            return None;
        }
        let token = CancellationToken::new();
        in_flight.insert(task.id.clone(), token.clone());
        self.in_flight_watch.send_replace(in_flight.len());
        drop(in_flight);

        Some((workflow_id, task, token))
    }

    async fn execute_assignment(
        self: Arc<Self>,
        workflow_id: WorkflowId,
        task: Task,
        cancel: CancellationToken,
    ) {
        let permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            // Semaphore closed means the runtime is shutting down.
            Err(_) => {
                self.settle(&task.id);
                return;
            }
        };

        let (outcome, attempts) = self.executor.execute(workflow_id, &task, &cancel).await;
        drop(permit);

        let body = match outcome {
            Outcome::Succeeded(result) => EventBody::TaskSucceeded {
                workflow_id,
                task_id: task.id.clone(),
                result,
                attempts,
            },
            Outcome::DeadLettered { error } => EventBody::TaskDeadLettered {
                workflow_id,
                task_id: task.id.clone(),
                error,
                attempts,
            },
            Outcome::Cancelled => EventBody::TaskFailed {
                workflow_id,
                task_id: task.id.clone(),
                error: "cancelled".to_string(),
                attempts,
            },
            // execute() never returns Retrying.
            Outcome::Retrying { .. } => {
                self.settle(&task.id);
                return;
            }
        };

        let event = Event::new(format!("runtime:{}", self.name), body);
        if let Err(err) = self
            .bus
            .publish_with_retry(event, OUTCOME_PUBLISH_ATTEMPTS, OUTCOME_PUBLISH_BASE_DELAY)
            .await
        {
            mlog_warn!(
                "runtime:{}: outcome for {} lost: {}",
                self.name,
                task.id,
                err
            );
        }
        // Settled only after the publish, so a drain that resolves never
        // leaves an outcome still unwritten.
        self.settle(&task.id);
    }

    /// Stop accepting assignments and wait until every accepted task has
    /// published its outcome.
    pub async fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        mlog!("runtime:{}: draining", self.name);
        let mut in_flight = self.in_flight_watch.subscribe();
        while *in_flight.borrow_and_update() != 0 {
            if in_flight.changed().await.is_err() {
                break;
            }
        }
        mlog!("runtime:{}: drained", self.name);
    }

    fn settle(&self, task_id: &TaskId) {
        let mut in_flight = self.lock_in_flight();
        in_flight.remove(task_id);
        self.in_flight_watch.send_replace(in_flight.len());
    }

    /// Number of tasks currently accepted and unsettled.
    pub fn in_flight_count(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
