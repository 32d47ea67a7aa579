//! Single-task execution with retry, backoff, timeout, and dead-lettering.
//!
//! The executor owns one concern: drive a task's attempts through the
//! `Invoker` until the task is terminal. Attempt boundaries are the unit of
//! observability (a `task-started` event per attempt) and of cancellation
//! (the token is checked before each attempt and during backoff sleeps).

use crate::bus::MessageBus;
use crate::collab::{InvokeError, Invoker};
use crate::core::event::{Event, EventBody};
use crate::core::task::Task;
use crate::workflow::WorkflowId;
use crate::{mlog_debug, mlog_warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Exponential backoff schedule for retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Upper bound on the computed delay.
    pub cap: Duration,
    /// Randomize each delay by +/-25% to decorrelate retry storms.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(base: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            base,
            multiplier,
            cap,
            jitter: true,
        }
    }

    /// Policy from the loaded configuration.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.retry_base(), config.retry_multiplier, config.retry_cap())
    }

    /// Disable jitter, for deterministic tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay to sleep after `attempt` failed attempts (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.cap.as_millis() as f64).max(0.0) as u64;

        let millis = if self.jitter && capped >= 4 {
            let range = capped / 2;
            capped - range / 2 + rand::random::<u64>() % range
        } else {
            capped
        };
        Duration::from_millis(millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(60))
    }
}

/// Why an attempt failed, and whether the retry budget applies.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    /// Transient; consumes retry budget.
    #[error("{0}")]
    Retryable(String),
    /// Permanent; dead-letters immediately.
    #[error("{0}")]
    Terminal(String),
    /// The attempt outran its per-attempt deadline. Retryable.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl ExecutionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::Retryable(_) | ExecutionError::Timeout(_)
        )
    }
}

/// Terminal (or between-attempt) outcome of driving a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The task produced a result.
    Succeeded(serde_json::Value),
    /// The attempt failed retryably with budget remaining; the caller
    /// sleeps until `next_attempt_at` before the next attempt.
    Retrying { next_attempt_at: Instant },
    /// Retry budget exhausted or terminal error.
    DeadLettered { error: String },
    /// Interrupted by cancellation.
    Cancelled,
}

/// Drives tasks through their invoker until terminal.
pub struct TaskExecutor {
    bus: Arc<MessageBus>,
    invoker: Arc<dyn Invoker>,
    policy: RetryPolicy,
    /// Event source label, e.g. `runtime:builder`.
    source: String,
}

impl TaskExecutor {
    pub fn new(
        bus: Arc<MessageBus>,
        invoker: Arc<dyn Invoker>,
        policy: RetryPolicy,
        source: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            invoker,
            policy,
            source: source.into(),
        }
    }

    /// Run one attempt.
    ///
    /// Publishes `task-started`, invokes with the task's deadline, and maps
    /// the result: success, retry with a scheduled next attempt, dead-letter
    /// when the budget is gone or the error is terminal, or cancelled.
    pub async fn execute_attempt(
        &self,
        workflow_id: WorkflowId,
        task: &Task,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        // Publish failure here is not worth aborting the attempt over;
        // terminal outcomes go through publish_with_retry in the runtime.
        if let Err(err) = self.bus.publish(Event::new(
            self.source.clone(),
            EventBody::TaskStarted {
                workflow_id,
                task_id: task.id.clone(),
                attempt,
            },
        )) {
            mlog_warn!("executor: task-started publish failed: {}", err);
        }

        let invocation = self
            .invoker
            .invoke(&task.agent, &task.payload, task.timeout());

        let result = tokio::select! {
            _ = cancel.cancelled() => return Outcome::Cancelled,
            r = tokio::time::timeout(task.timeout(), invocation) => r,
        };

        let error = match result {
            Ok(Ok(value)) => return Outcome::Succeeded(value),
            Ok(Err(InvokeError::Terminal(msg))) => {
                return Outcome::DeadLettered {
                    error: ExecutionError::Terminal(msg).to_string(),
                }
            }
            Ok(Err(InvokeError::Retryable(msg))) => ExecutionError::Retryable(msg),
            Err(_) => ExecutionError::Timeout(task.timeout()),
        };

        let max_attempts = task.max_retries + 1;
        if attempt >= max_attempts {
            mlog_debug!(
                "executor: {} dead-lettered after {} attempts: {}",
                task.id,
                attempt,
                error
            );
            return Outcome::DeadLettered {
                error: error.to_string(),
            };
        }

        let delay = self.policy.delay_for(attempt);
        mlog_debug!(
            "executor: {} attempt {}/{} failed ({}), next in {:?}",
            task.id,
            attempt,
            max_attempts,
            error,
            delay
        );
        Outcome::Retrying {
            next_attempt_at: Instant::now() + delay,
        }
    }

    /// Drive attempts until a terminal outcome.
    ///
    /// At most `max_retries + 1` attempts; the backoff sleep between
    /// attempts is cancellation-aware. Returns the outcome together with
    /// the number of attempts made, which the runtime carries on the
    /// outcome event.
    pub async fn execute(
        &self,
        workflow_id: WorkflowId,
        task: &Task,
        cancel: &CancellationToken,
    ) -> (Outcome, u32) {
        let mut attempt = 1;
        loop {
            match self
                .execute_attempt(workflow_id, task, attempt, cancel)
                .await
            {
                Outcome::Retrying { next_attempt_at } => {
                    tokio::select! {
                        _ = cancel.cancelled() => return (Outcome::Cancelled, attempt),
                        _ = tokio::time::sleep_until(next_attempt_at) => {}
                    }
                    attempt += 1;
                }
                outcome => return (outcome, attempt),
            }
        }
    }
}
