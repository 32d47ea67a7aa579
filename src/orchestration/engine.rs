//! The orchestrator: wiring between bus, machines, runtimes, and store.
//!
//! Owns the bus and the agent registry. Submissions are validated
//! synchronously and then travel as `workflow-submit` events, so the event
//! stream is the single write path into orchestration; a restart can replay
//! the same stream from the store and arrive at the same state.

use crate::bus::{EventFilter, MessageBus};
use crate::collab::EventStore;
use crate::config::Config;
use crate::core::event::{Event, EventBody};
use crate::error::{Error, Result};
use crate::orchestration::aggregator::{ResultAggregator, WorkflowReport};
use crate::orchestration::executor::RetryPolicy;
use crate::orchestration::machine::WorkflowMachine;
use crate::orchestration::registry::AgentRegistry;
use crate::orchestration::runtime::AgentRuntime;
use crate::workflow::{Workflow, WorkflowId, WorkflowSubmission};
use crate::{mlog, mlog_error, mlog_warn};
use crate::agent::AgentName;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

const SOURCE: &str = "orchestrator";

/// Top-level handle over one orchestration core instance.
pub struct Orchestrator {
    bus: Arc<MessageBus>,
    registry: AgentRegistry,
    config: Config,
    aggregator: Arc<ResultAggregator>,
    store: Option<Arc<dyn EventStore>>,
    runtimes: Mutex<HashMap<AgentName, Arc<AgentRuntime>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(config: Config, registry: AgentRegistry) -> Arc<Self> {
        Arc::new(Self {
            bus: Arc::new(MessageBus::new(config.bus_lookback)),
            registry,
            config,
            aggregator: ResultAggregator::new(),
            store: None,
            runtimes: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Attach an event store; every published event is mirrored into it.
    pub fn with_store(config: Config, registry: AgentRegistry, store: Arc<dyn EventStore>) -> Arc<Self> {
        Arc::new(Self {
            bus: Arc::new(MessageBus::new(config.bus_lookback)),
            registry,
            config,
            aggregator: ResultAggregator::new(),
            store: Some(store),
            runtimes: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    /// Spawn the background loops: aggregator, store mirror, and the
    /// submission consumer. Must be called before `submit`.
    pub fn start(self: Arc<Self>) {
        let mut handles = self.lock_handles();

        handles.push(Arc::clone(&self.aggregator).start(&self.bus));

        if let Some(store) = self.store.clone() {
            let mut all = self.bus.subscribe(EventFilter::All);
            handles.push(tokio::spawn(async move {
                while let Some(event) = all.recv().await {
                    // Write-mostly mirror; the stream does not wait for it.
                    if let Err(err) = store.record(&event).await {
                        mlog_warn!("orchestrator: event store record failed: {}", err);
                    }
                }
            }));
        }

        let mut submissions = self.bus.subscribe(EventFilter::Submissions);
        let orchestrator = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            while let Some(event) = submissions.recv().await {
                if let EventBody::WorkflowSubmit {
                    workflow_id,
                    tasks,
                    policy,
                } = event.body
                {
                    orchestrator.launch(WorkflowSubmission {
                        workflow_id,
                        tasks,
                        policy,
                    });
                }
                // workflow-cancel is consumed by each machine directly.
            }
        }));
    }

    /// Validate a submission and put it on the bus.
    ///
    /// Rejection is all-or-nothing: a validation or registration error
    /// means no workflow was created and nothing was published.
    pub fn submit(&self, submission: WorkflowSubmission) -> Result<WorkflowId> {
        submission.validate()?;
        for spec in &submission.tasks {
            if !self.registry.contains(&spec.agent) {
                return Err(Error::AgentNotRegistered(spec.agent.clone()));
            }
        }

        let workflow_id = submission.workflow_id;
        mlog!(
            "orchestrator: submit workflow {} ({} tasks)",
            workflow_id.short(),
            submission.tasks.len()
        );
        self.bus.publish(Event::new(
            SOURCE,
            EventBody::WorkflowSubmit {
                workflow_id,
                tasks: submission.tasks,
                policy: submission.policy,
            },
        ))?;
        Ok(workflow_id)
    }

    /// Request cancellation of a workflow.
    pub fn cancel(&self, workflow_id: WorkflowId) -> Result<()> {
        mlog!("orchestrator: cancel workflow {}", workflow_id.short());
        self.bus.publish(
            Event::new(SOURCE, EventBody::WorkflowCancel { workflow_id }).high_priority(),
        )?;
        Ok(())
    }

    /// Block until the workflow is terminal and return its frozen report.
    pub async fn wait(&self, workflow_id: WorkflowId) -> Result<WorkflowReport> {
        let mut terminals = self.aggregator.watch_terminals();
        loop {
            if let Some(report) = self.aggregator.report(workflow_id) {
                if report.complete {
                    return Ok(report);
                }
            }
            if self.bus.is_closed() {
                return Err(Error::BusUnavailable);
            }
            if terminals.changed().await.is_err() {
                return Err(Error::BusUnavailable);
            }
        }
    }

    /// Drain every runtime, close the bus, and join the background loops.
    pub async fn shutdown(&self) {
        mlog!("orchestrator: shutting down");
        let runtimes: Vec<Arc<AgentRuntime>> =
            self.lock_runtimes().values().cloned().collect();
        for runtime in runtimes {
            runtime.drain().await;
        }
        self.bus.close();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_handles());
        for handle in handles {
            if let Err(err) = handle.await {
                mlog_warn!("orchestrator: background task panicked: {}", err);
            }
        }
        mlog!("orchestrator: shutdown complete");
    }

    /// Build and spawn the machine actor for an accepted submission.
    fn launch(&self, submission: WorkflowSubmission) {
        let workflow_id = submission.workflow_id;
        // Subscribe before the machine starts so no outcome is missed.
        let machine_sub = self.bus.subscribe(EventFilter::Workflow(workflow_id));

        let machine = match submission.into_workflow().and_then(|workflow| {
            self.ensure_runtimes(&workflow)?;
            Ok(WorkflowMachine::new(workflow, Arc::clone(&self.bus)))
        }) {
            Ok(machine) => machine,
            Err(err) => {
                mlog_error!(
                    "orchestrator: workflow {} rejected at launch: {}",
                    workflow_id.short(),
                    err
                );
                if let Err(publish_err) = self.bus.publish(Event::new(
                    SOURCE,
                    EventBody::WorkflowFailed {
                        workflow_id,
                        reason: err.to_string(),
                    },
                )) {
                    mlog_warn!("orchestrator: failure event lost: {}", publish_err);
                }
                return;
            }
        };

        self.lock_handles().push(tokio::spawn(async move {
            match machine.run(machine_sub).await {
                Ok(state) => mlog!(
                    "orchestrator: workflow {} finished in state {}",
                    workflow_id.short(),
                    state
                ),
                Err(err) => mlog_error!(
                    "orchestrator: workflow {} machine error: {}",
                    workflow_id.short(),
                    err
                ),
            }
        }));
    }

    /// Spawn a runtime for every agent the workflow addresses, lazily.
    fn ensure_runtimes(&self, workflow: &Workflow) -> Result<()> {
        let mut runtimes = self.lock_runtimes();
        for task in workflow.tasks.values() {
            if runtimes.contains_key(&task.agent) {
                continue;
            }
            let invoker = self.registry.get(&task.agent)?;
            let workers = self
                .registry
                .config_for(&task.agent)
                .map(|c| c.workers)
                .unwrap_or(self.config.workers);
            let runtime = AgentRuntime::new(
                task.agent.clone(),
                Arc::clone(&self.bus),
                invoker,
                RetryPolicy::from_config(&self.config),
                workers,
            );
            self.lock_handles().push(Arc::clone(&runtime).start());
            mlog!("orchestrator: runtime for agent {} started", task.agent);
            runtimes.insert(task.agent.clone(), runtime);
        }
        Ok(())
    }

    fn lock_runtimes(&self) -> std::sync::MutexGuard<'_, HashMap<AgentName, Arc<AgentRuntime>>> {
        match self.runtimes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
