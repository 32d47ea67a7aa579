use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(crate::core::task::TaskId),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency {
        task: crate::core::task::TaskId,
        dependency: crate::core::task::TaskId,
    },

    #[error("Dependency cycle: {}", cycle.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" -> "))]
    CyclicDependency {
        cycle: Vec<crate::core::task::TaskId>,
    },

    #[error("Invalid workflow transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Message bus unavailable")]
    BusUnavailable,

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(crate::workflow::WorkflowId),

    #[error("No agent registered under name: {0}")]
    AgentNotRegistered(crate::agent::AgentName),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
