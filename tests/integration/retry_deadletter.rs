//! Retry budgets, dead-lettering, and fail-fast skip propagation.

use crate::fixtures::{fast_config, task, Behavior, ScriptedInvoker};
use maestro::{
    AgentRegistry, EventBody, FailurePolicy, MemoryEventStore, Orchestrator, TaskId, TaskStatus,
    WorkflowState, WorkflowSubmission,
};
use std::sync::Arc;

#[tokio::test]
async fn acceptance_exhausted_retries_fail_workflow_after_three_attempts() {
    // Given a task with maxRetries = 2 whose invoker always fails
    let invoker = Arc::new(ScriptedInvoker::new().with("doomed", Behavior::AlwaysFail));
    let store = Arc::new(MemoryEventStore::new());
    let registry = AgentRegistry::new().with_agent("worker", invoker.clone());
    let orch = Orchestrator::with_store(fast_config(), registry, store.clone());
    Arc::clone(&orch).start();

    // When the workflow runs to termination
    let id = orch
        .submit(WorkflowSubmission::new(
            vec![task("doomed", &[]).with_retries(2)],
            FailurePolicy::FailFast,
        ))
        .unwrap();
    let report = orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // Then the workflow failed after exactly three attempts
    assert_eq!(report.status, WorkflowState::Failed);
    assert_eq!(invoker.calls("doomed"), 3);
    let outcome = &report.outcomes[&TaskId::from("doomed")];
    assert_eq!(outcome.attempts, 3);
    assert!(matches!(outcome.status, TaskStatus::Failed { .. }));

    // And each attempt left a task-started event on the stream
    let events = store.events().await;
    let started: Vec<u32> = events
        .iter()
        .filter_map(|e| match &e.body {
            EventBody::TaskStarted { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![1, 2, 3]);
    assert!(events
        .iter()
        .any(|e| matches!(e.body, EventBody::TaskDeadLettered { .. })));
}

#[tokio::test]
async fn acceptance_retryable_flake_recovers_within_budget() {
    // Given a task that fails twice then succeeds, with maxRetries = 3
    let invoker = Arc::new(ScriptedInvoker::new().with("flaky", Behavior::FailTimes(2)));
    let registry = AgentRegistry::new().with_agent("worker", invoker.clone());
    let orch = Orchestrator::new(fast_config(), registry);
    Arc::clone(&orch).start();

    // When the workflow runs
    let id = orch
        .submit(WorkflowSubmission::new(
            vec![task("flaky", &[]).with_retries(3)],
            FailurePolicy::FailFast,
        ))
        .unwrap();
    let report = orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // Then it completes on the third attempt
    assert_eq!(report.status, WorkflowState::Completed);
    assert_eq!(invoker.calls("flaky"), 3);
    assert_eq!(report.outcomes[&TaskId::from("flaky")].attempts, 3);
}

#[tokio::test]
async fn acceptance_terminal_rejection_skips_retry_budget() {
    // Given a terminally rejecting task with a generous retry budget
    let invoker = Arc::new(ScriptedInvoker::new().with("bad", Behavior::Reject));
    let registry = AgentRegistry::new().with_agent("worker", invoker.clone());
    let orch = Orchestrator::new(fast_config(), registry);
    Arc::clone(&orch).start();

    // When it runs
    let id = orch
        .submit(WorkflowSubmission::new(
            vec![task("bad", &[]).with_retries(5)],
            FailurePolicy::FailFast,
        ))
        .unwrap();
    let report = orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // Then it dead-letters after a single attempt
    assert_eq!(report.status, WorkflowState::Failed);
    assert_eq!(invoker.calls("bad"), 1);
    assert_eq!(report.outcomes[&TaskId::from("bad")].attempts, 1);
}

#[tokio::test]
async fn acceptance_fail_fast_never_runs_dependents() {
    // Given a chain a -> b -> c where a rejects terminally
    let invoker = Arc::new(ScriptedInvoker::new().with("a", Behavior::Reject));
    let registry = AgentRegistry::new().with_agent("worker", invoker.clone());
    let orch = Orchestrator::new(fast_config(), registry);
    Arc::clone(&orch).start();

    // When the fail-fast workflow terminates
    let id = orch
        .submit(WorkflowSubmission::new(
            vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])],
            FailurePolicy::FailFast,
        ))
        .unwrap();
    let report = orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // Then the report covers every task: a failed, its dependents skipped
    assert_eq!(report.status, WorkflowState::Failed);
    assert!(matches!(
        report.outcomes[&TaskId::from("a")].status,
        TaskStatus::Failed { .. }
    ));
    assert_eq!(invoker.calls("b"), 0);
    assert_eq!(invoker.calls("c"), 0);
    assert_eq!(report.outcomes[&TaskId::from("b")].status, TaskStatus::Skipped);
    assert_eq!(report.outcomes[&TaskId::from("c")].status, TaskStatus::Skipped);
    assert_eq!(report.outcomes.len(), 3);
}
