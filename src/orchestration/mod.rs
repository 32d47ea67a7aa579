//! Orchestration components: the machine, executor, runtimes, aggregator,
//! and the engine that wires them together over the bus.

pub mod aggregator;
pub mod engine;
pub mod executor;
pub mod machine;
pub mod registry;
pub mod runtime;

pub use aggregator::{ResultAggregator, TaskOutcome, WorkflowReport};
pub use engine::Orchestrator;
pub use executor::{ExecutionError, Outcome, RetryPolicy, TaskExecutor};
pub use machine::WorkflowMachine;
pub use registry::AgentRegistry;
pub use runtime::AgentRuntime;
