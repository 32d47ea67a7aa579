//! End-to-end workflow execution.

use crate::fixtures::{fast_config, task, Behavior, ScriptedInvoker};
use maestro::{
    AgentRegistry, EventBody, EventStore, FailurePolicy, MemoryEventStore, Orchestrator, TaskId,
    TaskStatus, WorkflowState, WorkflowSubmission,
};
use std::sync::Arc;

#[tokio::test]
async fn acceptance_diamond_workflow_completes() {
    // Given a diamond graph a -> {b, c} -> d served by one agent
    let invoker = Arc::new(ScriptedInvoker::new());
    let store = Arc::new(MemoryEventStore::new());
    let registry = AgentRegistry::new().with_agent("worker", invoker.clone());
    let orch = Orchestrator::with_store(fast_config(), registry, store.clone());
    Arc::clone(&orch).start();

    // When the workflow is submitted and runs to termination
    let id = orch
        .submit(WorkflowSubmission::new(
            vec![
                task("a", &[]),
                task("b", &["a"]),
                task("c", &["a"]),
                task("d", &["b", "c"]),
            ],
            FailurePolicy::FailFast,
        ))
        .unwrap();
    let report = orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // Then every task succeeded exactly once
    assert!(report.complete);
    assert_eq!(report.status, WorkflowState::Completed);
    assert_eq!(report.outcomes.len(), 4);
    for name in ["a", "b", "c", "d"] {
        assert_eq!(
            report.outcomes[&TaskId::from(name)].status,
            TaskStatus::Succeeded,
            "task {}",
            name
        );
        assert_eq!(invoker.calls(name), 1, "task {}", name);
    }

    // And no dependent was assigned before its dependency succeeded
    let events = store.events().await;
    let seq_of = |pred: &dyn Fn(&EventBody) -> bool| -> u64 {
        events
            .iter()
            .find(|e| pred(&e.body))
            .map(|e| e.seq)
            .expect("event missing")
    };
    let a_succeeded = seq_of(&|b| {
        matches!(b, EventBody::TaskSucceeded { task_id, .. } if task_id == &TaskId::from("a"))
    });
    for dependent in ["b", "c"] {
        let assigned = seq_of(&|b| {
            matches!(b, EventBody::TaskAssigned { task, .. } if task.id == TaskId::from(dependent))
        });
        assert!(
            a_succeeded < assigned,
            "{} assigned (seq {}) before a succeeded (seq {})",
            dependent,
            assigned,
            a_succeeded
        );
    }
}

#[tokio::test]
async fn acceptance_continue_on_error_finishes_independent_branch() {
    // Given a failing branch (a -> b) and an independent branch (x -> y)
    let invoker = Arc::new(ScriptedInvoker::new().with("a", Behavior::Reject));
    let registry = AgentRegistry::new().with_agent("worker", invoker.clone());
    let orch = Orchestrator::new(fast_config(), registry);
    Arc::clone(&orch).start();

    // When submitted with continue-on-error
    let id = orch
        .submit(WorkflowSubmission::new(
            vec![
                task("a", &[]),
                task("b", &["a"]),
                task("x", &[]),
                task("y", &["x"]),
            ],
            FailurePolicy::ContinueOnError,
        ))
        .unwrap();
    let report = orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // Then the workflow fails but the independent branch ran to success
    assert_eq!(report.status, WorkflowState::Failed);
    assert_eq!(
        report.outcomes[&TaskId::from("y")].status,
        TaskStatus::Succeeded
    );
    assert!(matches!(
        report.outcomes[&TaskId::from("a")].status,
        TaskStatus::Failed { .. }
    ));
    // And the dependent of the failed task never executed, yet still
    // appears in the report as skipped
    assert_eq!(invoker.calls("b"), 0);
    assert_eq!(
        report.outcomes[&TaskId::from("b")].status,
        TaskStatus::Skipped
    );
    assert_eq!(invoker.calls("x"), 1);
    assert_eq!(invoker.calls("y"), 1);
    assert_eq!(report.outcomes.len(), 4);
}

#[tokio::test]
async fn acceptance_two_agents_execute_their_own_tasks() {
    // Given two agents with distinct invokers
    let builder = Arc::new(ScriptedInvoker::new());
    let reviewer = Arc::new(ScriptedInvoker::new());
    let registry = AgentRegistry::new()
        .with_agent("worker", builder.clone())
        .with_agent("reviewer", reviewer.clone());
    let orch = Orchestrator::new(fast_config(), registry);
    Arc::clone(&orch).start();

    // When a workflow spans both agents
    let mut review = task("review", &["build"]);
    review.agent = "reviewer".into();
    let id = orch
        .submit(WorkflowSubmission::new(
            vec![task("build", &[]), review],
            FailurePolicy::FailFast,
        ))
        .unwrap();
    let report = orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // Then each task ran on its own agent
    assert_eq!(report.status, WorkflowState::Completed);
    assert_eq!(builder.calls("build"), 1);
    assert_eq!(builder.calls("review"), 0);
    assert_eq!(reviewer.calls("review"), 1);
}

#[tokio::test]
async fn acceptance_report_survives_store_replay() {
    // Given a completed workflow mirrored into the event store
    let invoker = Arc::new(ScriptedInvoker::new());
    let store = Arc::new(MemoryEventStore::new());
    let registry = AgentRegistry::new().with_agent("worker", invoker);
    let orch = Orchestrator::with_store(fast_config(), registry, store.clone());
    Arc::clone(&orch).start();

    let id = orch
        .submit(WorkflowSubmission::new(
            vec![task("a", &[]), task("b", &["a"])],
            FailurePolicy::FailFast,
        ))
        .unwrap();
    orch.wait(id).await.unwrap();
    orch.shutdown().await;

    // When the stored stream is replayed into a snapshot
    let snapshot = store.load_workflow(id).await.unwrap().unwrap();

    // Then the snapshot reflects the terminal state of every task
    assert_eq!(snapshot.state, WorkflowState::Completed);
    assert_eq!(
        snapshot.task_statuses[&TaskId::from("a")],
        TaskStatus::Succeeded
    );
    assert_eq!(
        snapshot.task_statuses[&TaskId::from("b")],
        TaskStatus::Succeeded
    );
}
