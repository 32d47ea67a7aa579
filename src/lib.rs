//! maestro: an event-driven multi-agent task orchestration core.
//!
//! Callers define workflows as task graphs, register an `Invoker` per agent
//! name, and submit. Every cross-component interaction travels as an event
//! over the in-process message bus: the workflow machine dispatches ready
//! tasks, agent runtimes execute them with retry and timeout handling, and
//! the aggregator folds terminal outcomes into queryable reports.
//!
//! ```no_run
//! use maestro::{
//!     AgentRegistry, Config, FailurePolicy, Orchestrator, TaskPayload, TaskSpec,
//!     WorkflowSubmission,
//! };
//! # use std::sync::Arc;
//! # async fn demo(invoker: Arc<dyn maestro::Invoker>) -> maestro::Result<()> {
//! let registry = AgentRegistry::new().with_agent("builder", invoker);
//! let orchestrator = Orchestrator::new(Config::load()?, registry);
//! Arc::clone(&orchestrator).start();
//!
//! let id = orchestrator.submit(WorkflowSubmission::new(
//!     vec![
//!         TaskSpec::new("compile", "builder", TaskPayload::Command { command: "make".into() }),
//!         TaskSpec::new("test", "builder", TaskPayload::Command { command: "make test".into() })
//!             .with_deps(&["compile"]),
//!     ],
//!     FailurePolicy::FailFast,
//! ))?;
//!
//! let report = orchestrator.wait(id).await?;
//! assert!(report.complete);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod bus;
pub mod collab;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod workflow;

pub use agent::{AgentConfig, AgentName};
pub use bus::{EventFilter, MessageBus, Subscription};
pub use collab::{EventStore, InvokeError, Invoker, MemoryEventStore, WorkflowSnapshot};
pub use config::Config;
pub use core::{Event, EventBody, EventId, Priority, Task, TaskGraph, TaskId, TaskPayload, TaskSpec, TaskStatus};
pub use error::{Error, Result};
pub use orchestration::{
    AgentRegistry, AgentRuntime, ExecutionError, Orchestrator, Outcome, ResultAggregator,
    RetryPolicy, TaskExecutor, TaskOutcome, WorkflowMachine, WorkflowReport,
};
pub use workflow::{
    FailurePolicy, StateHistoryEntry, StateTracker, Workflow, WorkflowId, WorkflowState,
    WorkflowSubmission,
};
