//! Shared fixtures: scripted invokers and fast test configuration.

use async_trait::async_trait;
use maestro::{AgentName, Config, InvokeError, Invoker, TaskPayload, TaskSpec};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// What the invoker does when it sees a given command.
#[allow(dead_code)]
pub enum Behavior {
    /// Succeed immediately.
    Succeed,
    /// Fail retryably this many times, then succeed.
    FailTimes(u32),
    /// Fail retryably on every call.
    AlwaysFail,
    /// Reject terminally on every call.
    Reject,
    /// Never return; only cancellation or timeout ends the attempt.
    Hang,
}

/// Invoker scripted per command string, with call counting.
pub struct ScriptedInvoker {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with(mut self, command: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(command.to_string(), behavior);
        self
    }

    /// How many times a command has been invoked.
    pub fn calls(&self, command: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(command)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(
        &self,
        _agent: &AgentName,
        payload: &TaskPayload,
        _deadline: Duration,
    ) -> Result<serde_json::Value, InvokeError> {
        let TaskPayload::Command { command } = payload else {
            return Err(InvokeError::Terminal("command payloads only".to_string()));
        };

        let count = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(command.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        match self.behaviors.get(command) {
            None | Some(Behavior::Succeed) => {
                Ok(serde_json::json!({"ran": command, "attempt": count}))
            }
            Some(Behavior::FailTimes(n)) if count <= *n => {
                Err(InvokeError::Retryable(format!("flake {} of {}", count, n)))
            }
            Some(Behavior::FailTimes(_)) => {
                Ok(serde_json::json!({"ran": command, "attempt": count}))
            }
            Some(Behavior::AlwaysFail) => {
                Err(InvokeError::Retryable(format!("failure {}", count)))
            }
            Some(Behavior::Reject) => Err(InvokeError::Terminal("rejected".to_string())),
            Some(Behavior::Hang) => std::future::pending().await,
        }
    }
}

/// Task spec whose command equals its id, for scripting by id.
pub fn task(id: &str, deps: &[&str]) -> TaskSpec {
    TaskSpec::new(
        id,
        "worker",
        TaskPayload::Command {
            command: id.to_string(),
        },
    )
    .with_deps(deps)
}

/// Config with millisecond-scale retry delays so tests run fast.
pub fn fast_config() -> Config {
    Config {
        workers: 4,
        fail_fast: true,
        retry_base_ms: 5,
        retry_multiplier: 2.0,
        retry_cap_ms: 50,
        bus_lookback: 64,
    }
}
