//! Agent identity for the orchestration core.
//!
//! Agents are named executors. A task addresses its executor by name, and
//! one `AgentRuntime` instance serves each registered name.

use serde::{Deserialize, Serialize};

/// Name of an execution agent.
///
/// Task submissions address agents by name, so the name is the routing key
/// on the bus: a `task-assigned` event targeted at `"builder"` is consumed
/// only by the runtime registered under `"builder"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentName(pub String);

impl AgentName {
    /// Create an agent name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-agent runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of tasks this agent executes concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    4
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}
