//! Core data model: tasks, events, and the dependency graph.

pub mod dag;
pub mod event;
pub mod task;

pub use dag::TaskGraph;
pub use event::{Event, EventBody, EventId, Priority};
pub use task::{Task, TaskId, TaskPayload, TaskSpec, TaskStatus};
