//! Workflow cancellation: interrupting in-flight work, suppressing dispatch.

use crate::fixtures::{fast_config, task, Behavior, ScriptedInvoker};
use maestro::{
    AgentRegistry, EventBody, EventFilter, FailurePolicy, Orchestrator, TaskId, TaskStatus,
    WorkflowState, WorkflowSubmission,
};
use std::sync::Arc;

#[tokio::test]
async fn acceptance_cancel_interrupts_running_task() {
    // Given a workflow whose only task hangs forever
    let invoker = Arc::new(ScriptedInvoker::new().with("slow", Behavior::Hang));
    let registry = AgentRegistry::new().with_agent("worker", invoker.clone());
    let orch = Orchestrator::new(fast_config(), registry);
    Arc::clone(&orch).start();

    let mut watch = orch.bus().subscribe(EventFilter::All);
    let id = orch
        .submit(WorkflowSubmission::new(
            vec![task("slow", &[])],
            FailurePolicy::FailFast,
        ))
        .unwrap();

    // When the workflow is cancelled after the task has started
    loop {
        match watch.recv().await.expect("bus closed early").body {
            EventBody::TaskStarted { .. } => break,
            _ => continue,
        }
    }
    orch.cancel(id).unwrap();
    let report = orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // Then the task is reported failed with a cancelled error
    assert_eq!(report.status, WorkflowState::Failed);
    let outcome = &report.outcomes[&TaskId::from("slow")];
    assert_eq!(outcome.error.as_deref(), Some("cancelled"));
    assert!(matches!(outcome.status, TaskStatus::Failed { .. }));
    assert_eq!(invoker.calls("slow"), 1);
}

#[tokio::test]
async fn acceptance_cancel_suppresses_pending_dependents() {
    // Given a hanging root with a dependent waiting on it
    let invoker = Arc::new(ScriptedInvoker::new().with("root", Behavior::Hang));
    let registry = AgentRegistry::new().with_agent("worker", invoker.clone());
    let orch = Orchestrator::new(fast_config(), registry);
    Arc::clone(&orch).start();

    let mut watch = orch.bus().subscribe(EventFilter::All);
    let id = orch
        .submit(WorkflowSubmission::new(
            vec![task("root", &[]), task("after", &["root"])],
            FailurePolicy::FailFast,
        ))
        .unwrap();

    // When cancellation lands while the root is running
    loop {
        match watch.recv().await.expect("bus closed early").body {
            EventBody::TaskStarted { .. } => break,
            _ => continue,
        }
    }
    orch.cancel(id).unwrap();
    let report = orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // Then the dependent is never dispatched, let alone executed
    assert_eq!(report.status, WorkflowState::Failed);
    assert_eq!(invoker.calls("after"), 0);
    assert_eq!(
        report.outcomes[&TaskId::from("after")].status,
        TaskStatus::Skipped
    );
}

#[tokio::test]
async fn acceptance_cancel_after_completion_is_a_no_op() {
    // Given a workflow that has already completed
    let invoker = Arc::new(ScriptedInvoker::new());
    let registry = AgentRegistry::new().with_agent("worker", invoker.clone());
    let orch = Orchestrator::new(fast_config(), registry);
    Arc::clone(&orch).start();

    let id = orch
        .submit(WorkflowSubmission::new(
            vec![task("quick", &[])],
            FailurePolicy::FailFast,
        ))
        .unwrap();
    let report = orch.wait(id).await.unwrap();
    assert_eq!(report.status, WorkflowState::Completed);

    // When a late cancel arrives
    orch.cancel(id).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    orch.shutdown().await;

    // Then the frozen report is unchanged
    let report = orch.aggregator().report(id).unwrap();
    assert_eq!(report.status, WorkflowState::Completed);
    assert_eq!(
        report.outcomes[&TaskId::from("quick")].status,
        TaskStatus::Succeeded
    );
}
