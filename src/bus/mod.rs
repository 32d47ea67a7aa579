//! In-process message bus with priority-aware delivery.
//!
//! Components coordinate exclusively through events published here. The bus
//! stamps every event with a monotonically increasing sequence number and
//! fans it out to each subscriber whose filter matches. Per subscriber,
//! high-priority events may overtake queued normal events, but only within
//! a bounded look-back window so a burst of cancellations can never starve
//! ordinary traffic indefinitely.

use crate::agent::AgentName;
use crate::core::event::{Event, EventBody, Priority};
use crate::error::{Error, Result};
use crate::workflow::WorkflowId;
use crate::{mlog_debug, mlog_warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Which events a subscriber wants to see.
///
/// Filters form a closed set so routing stays auditable: every delivery
/// decision is one of these five match rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event on the bus.
    All,
    /// Events addressed to a specific agent (assignments and cancels).
    AssignedTo(AgentName),
    /// Events belonging to one workflow.
    Workflow(WorkflowId),
    /// Terminal task and workflow outcomes.
    Terminal,
    /// Workflow submissions and cancellation requests.
    Submissions,
}

impl EventFilter {
    /// Check whether an event passes this filter.
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::AssignedTo(agent) => event.target.as_ref() == Some(agent),
            EventFilter::Workflow(id) => event.body.workflow_id() == *id,
            EventFilter::Terminal => event.body.is_terminal(),
            EventFilter::Submissions => matches!(
                event.body,
                EventBody::WorkflowSubmit { .. } | EventBody::WorkflowCancel { .. }
            ),
        }
    }
}

/// Per-subscriber delivery queues.
#[derive(Debug, Default)]
struct Queues {
    high: VecDeque<Event>,
    normal: VecDeque<Event>,
}

impl Queues {
    fn push(&mut self, event: Event) {
        match event.priority {
            Priority::High => self.high.push_back(event),
            Priority::Normal => self.normal.push_back(event),
        }
    }

    /// Pick the next event to deliver.
    ///
    /// A queued high-priority event overtakes normal traffic only while the
    /// oldest normal event is within `lookback` sequence numbers of it;
    /// past that, the normal event goes first. This bounds how far any
    /// event can be starved by the other class.
    fn pop(&mut self, lookback: u64) -> Option<Event> {
        match (self.high.front(), self.normal.front()) {
            (Some(h), Some(n)) => {
                if h.seq <= n.seq.saturating_add(lookback) {
                    self.high.pop_front()
                } else {
                    self.normal.pop_front()
                }
            }
            (Some(_), None) => self.high.pop_front(),
            (None, Some(_)) => self.normal.pop_front(),
            (None, None) => None,
        }
    }
}

#[derive(Debug)]
struct SubState {
    filter: EventFilter,
    queues: Mutex<Queues>,
    notify: Notify,
    /// Set when the `Subscription` handle is dropped.
    detached: AtomicBool,
}

/// A subscriber's receive handle.
///
/// Dropping the handle detaches the subscriber; the bus prunes it on the
/// next publish.
#[derive(Debug)]
pub struct Subscription {
    state: Arc<SubState>,
    closed: Arc<AtomicBool>,
    lookback: u64,
}

impl Subscription {
    /// Receive the next matching event.
    ///
    /// Returns `None` once the bus is closed and every queued event has
    /// been drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            let notified = self.state.notify.notified();
            if let Some(event) = self.pop() {
                return Some(event);
            }
            if self.closed.load(Ordering::SeqCst) {
                // One more look in case a publish raced the close flag.
                return self.pop();
            }
            notified.await;
        }
    }

    /// Receive without waiting; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.pop()
    }

    fn pop(&self) -> Option<Event> {
        let mut queues = match self.state.queues.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        queues.pop(self.lookback)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.detached.store(true, Ordering::SeqCst);
    }
}

/// The bus itself. Shared behind an `Arc`.
#[derive(Debug)]
pub struct MessageBus {
    seq: AtomicU64,
    subscribers: Mutex<Vec<Arc<SubState>>>,
    closed: Arc<AtomicBool>,
    lookback: u64,
}

impl MessageBus {
    /// Create a bus with the given priority look-back window.
    pub fn new(lookback: u64) -> Self {
        Self {
            seq: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
            lookback,
        }
    }

    /// Register a subscriber with a filter.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let state = Arc::new(SubState {
            filter,
            queues: Mutex::new(Queues::default()),
            notify: Notify::new(),
            detached: AtomicBool::new(false),
        });
        self.lock_subscribers().push(Arc::clone(&state));
        Subscription {
            state,
            closed: Arc::clone(&self.closed),
            lookback: self.lookback,
        }
    }

    /// Publish an event, stamping its sequence number.
    ///
    /// Fan-out is synchronous: by the time this returns, the event sits in
    /// every matching subscriber's queue.
    ///
    /// # Errors
    ///
    /// Returns `BusUnavailable` after `close`.
    pub fn publish(&self, mut event: Event) -> Result<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::BusUnavailable);
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        event.seq = seq;
        event.published_at = chrono::Utc::now();

        mlog_debug!(
            "bus: publish seq={} {} priority={} wf={}",
            seq,
            event.body.tag(),
            event.priority,
            event.body.workflow_id().short()
        );

        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|s| !s.detached.load(Ordering::SeqCst));
        for sub in subscribers.iter() {
            if sub.filter.matches(&event) {
                match sub.queues.lock() {
                    Ok(mut q) => q.push(event.clone()),
                    Err(poisoned) => poisoned.into_inner().push(event.clone()),
                }
                sub.notify.notify_one();
            }
        }

        Ok(seq)
    }

    /// Publish with exponential backoff, for events that must not be lost.
    ///
    /// Terminal outcomes are published through this so a transiently
    /// unavailable bus does not silently drop a result.
    pub async fn publish_with_retry(
        &self,
        event: Event,
        attempts: u32,
        base_delay: Duration,
    ) -> Result<u64> {
        let mut delay = base_delay;
        for attempt in 0..attempts {
            match self.publish(event.clone()) {
                Ok(seq) => return Ok(seq),
                Err(err) if attempt + 1 == attempts => return Err(err),
                Err(_) => {
                    mlog_warn!(
                        "bus: publish of {} failed, retrying in {:?}",
                        event.body.tag(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
        Err(Error::BusUnavailable)
    }

    /// Close the bus. Pending queued events remain receivable; new
    /// publishes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for sub in self.lock_subscribers().iter() {
            sub.notify.notify_one();
        }
        mlog_debug!("bus: closed at seq={}", self.seq.load(Ordering::SeqCst));
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The last sequence number handed out.
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Arc<SubState>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(64)
    }
}
