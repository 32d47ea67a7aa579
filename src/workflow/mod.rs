//! Workflow definitions for the maestro orchestrator.
//!
//! This module provides the workflow lifecycle types, the submission format
//! callers use to define a task graph, and the validated `Workflow` the
//! state machine executes.

mod submission;
mod types;

pub use submission::{Workflow, WorkflowSubmission};
pub use types::{FailurePolicy, StateHistoryEntry, StateTracker, WorkflowId, WorkflowState};
