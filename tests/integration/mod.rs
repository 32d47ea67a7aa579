//! Integration tests driving the orchestrator end to end over the bus.

mod fixtures;

mod cancellation;
mod retry_deadletter;
mod workflow_e2e;
