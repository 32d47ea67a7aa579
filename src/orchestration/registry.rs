//! Agent registry: the explicit wiring from agent names to invokers.
//!
//! Built once at startup and passed by handle; there is no global lookup.

use crate::agent::{AgentConfig, AgentName};
use crate::collab::Invoker;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps agent names to their invokers and per-agent settings.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    invokers: HashMap<AgentName, Arc<dyn Invoker>>,
    configs: HashMap<AgentName, AgentConfig>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration with default per-agent settings.
    pub fn with_agent(mut self, name: impl Into<AgentName>, invoker: Arc<dyn Invoker>) -> Self {
        self.register(name, invoker);
        self
    }

    /// Builder-style registration with explicit per-agent settings.
    pub fn with_agent_config(
        mut self,
        name: impl Into<AgentName>,
        invoker: Arc<dyn Invoker>,
        config: AgentConfig,
    ) -> Self {
        let name = name.into();
        self.configs.insert(name.clone(), config);
        self.invokers.insert(name, invoker);
        self
    }

    pub fn register(&mut self, name: impl Into<AgentName>, invoker: Arc<dyn Invoker>) {
        self.invokers.insert(name.into(), invoker);
    }

    /// Look up the invoker for an agent.
    ///
    /// # Errors
    ///
    /// `AgentNotRegistered` when the name is unknown.
    pub fn get(&self, name: &AgentName) -> Result<Arc<dyn Invoker>> {
        self.invokers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AgentNotRegistered(name.clone()))
    }

    /// Per-agent settings, if any were registered for this name.
    pub fn config_for(&self, name: &AgentName) -> Option<&AgentConfig> {
        self.configs.get(name)
    }

    pub fn contains(&self, name: &AgentName) -> bool {
        self.invokers.contains_key(name)
    }

    /// Registered agent names, sorted for deterministic iteration.
    pub fn names(&self) -> Vec<AgentName> {
        let mut names: Vec<AgentName> = self.invokers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}
