//! Optional recording of thread hand-offs.
//!
//! When enabled, every task submitted to a pool is wrapped so the submitting and
//! executing threads, queue wait and run time are recorded against the event's
//! correlation id. Disabled instrumentation returns the task untouched.
//!
//! Records are kept for the most recent [`DEFAULT_DIAGNOSTIC_CAPACITY`] events;
//! older events are evicted first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::Mutex;
use proactor_pool::Task;

use crate::event::CorrelationId;

/// One recorded hand-off of an event to a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHandoff {
    /// Pool the task was submitted to.
    pub pool: String,
    /// Stage executed.
    pub stage: String,
    /// Thread that submitted the task.
    pub submitted_from: String,
    /// Thread that ran it.
    pub executed_on: String,
    /// Time between submission and start.
    pub queued: Duration,
    /// Run time; zero until the task returns.
    pub elapsed: Duration,
}

/// Events whose hand-offs a [`DiagnosticContext`] keeps by default.
pub const DEFAULT_DIAGNOSTIC_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Records {
    by_event: HashMap<CorrelationId, Vec<ThreadHandoff>>,
    // Events in first-recorded order, for eviction.
    order: VecDeque<CorrelationId>,
}

/// Hand-off records keyed by correlation id, bounded to a number of events.
/// Cloning shares the records.
#[derive(Debug, Clone)]
pub struct DiagnosticContext {
    capacity: usize,
    records: Arc<Mutex<Records>>,
}

impl Default for DiagnosticContext {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DIAGNOSTIC_CAPACITY)
    }
}

impl DiagnosticContext {
    /// Empty context keeping [`DEFAULT_DIAGNOSTIC_CAPACITY`] events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty context keeping the records of at most `capacity` events (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), records: Arc::new(Mutex::new(Records::default())) }
    }

    /// Most events kept before the oldest is evicted.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hand-offs recorded for `id`, oldest first.
    #[must_use]
    pub fn handoffs(&self, id: CorrelationId) -> Vec<ThreadHandoff> {
        self.records.lock().by_event.get(&id).cloned().unwrap_or_default()
    }

    /// Remove and return the records for `id`.
    pub fn take(&self, id: CorrelationId) -> Vec<ThreadHandoff> {
        let mut records = self.records.lock();
        let Some(handoffs) = records.by_event.remove(&id) else {
            return Vec::new();
        };
        records.order.retain(|kept| *kept != id);
        handoffs
    }

    /// Number of events with at least one record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().by_event.len()
    }

    /// True if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().by_event.is_empty()
    }

    fn record(&self, id: CorrelationId, handoff: ThreadHandoff) -> usize {
        let mut records = self.records.lock();
        if !records.by_event.contains_key(&id) {
            if records.order.len() >= self.capacity
                && let Some(evicted) = records.order.pop_front()
            {
                records.by_event.remove(&evicted);
            }
            records.order.push_back(id);
        }
        let entries = records.by_event.entry(id).or_default();
        entries.push(handoff);
        entries.len() - 1
    }

    fn finish(&self, id: CorrelationId, index: usize, elapsed: Duration) {
        let mut records = self.records.lock();
        if let Some(handoff) = records.by_event.get_mut(&id).and_then(|e| e.get_mut(index)) {
            handoff.elapsed = elapsed;
        }
    }
}

/// Wraps pool-bound tasks when enabled.
#[derive(Debug, Clone)]
pub struct ThreadInstrumentation {
    enabled: bool,
    context: DiagnosticContext,
}

impl ThreadInstrumentation {
    /// Instrumentation writing into `context`.
    #[must_use]
    pub fn new(enabled: bool, context: DiagnosticContext) -> Self {
        Self { enabled, context }
    }

    /// True if tasks are wrapped.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The context records are written to.
    #[must_use]
    pub fn context(&self) -> &DiagnosticContext {
        &self.context
    }

    /// Wrap `task` so its hand-off is recorded; returns it unchanged when disabled.
    #[must_use]
    pub fn wrap(&self, id: CorrelationId, pool: &str, stage: &str, task: Task) -> Task {
        if !self.enabled {
            return task;
        }
        let context = self.context.clone();
        let pool = pool.to_string();
        let stage = stage.to_string();
        let submitted_from = current_thread_name();
        let submitted_at = Instant::now();
        Box::new(move || {
            let started = Instant::now();
            let handoff = ThreadHandoff {
                pool,
                stage,
                submitted_from,
                executed_on: current_thread_name(),
                queued: started - submitted_at,
                elapsed: Duration::ZERO,
            };
            trace!("Event {id} hand-off: {handoff:?}");
            // Recorded before the task runs: the task itself publishes the continuation.
            let index = context.record(id, handoff);
            task();
            context.finish(id, index, started.elapsed());
        })
    }
}

fn current_thread_name() -> String {
    let current = thread::current();
    current.name().map_or_else(|| format!("{:?}", current.id()), str::to_string)
}
