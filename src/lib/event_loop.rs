//! Event-loop consumers.
//!
//! A consumer runs as a long-lived task on the event-loop pool. It pulls events
//! from its sink's buffer, runs inline stages itself and hands offloaded stages to
//! the CPU-intensive or blocking pool. An offloaded stage reports back through the
//! consumer's mailbox; the next stage is only ever sequenced here, on the loop.
//!
//! The loop never blocks on anything but its own channels:
//! - offload permits are taken without waiting; an event that cannot get one is
//!   parked and the consumer stops pulling new events until the parked ones move on
//! - a task rejected by a saturated pool goes onto a retry timer and is resubmitted
//!   unchanged once the interval has passed

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, never, select, unbounded};
use log::{debug, trace, warn};
use proactor_pool::{Permit, PoolRole, Task, WorkerPool, panic_message};

use crate::classifier::RoutedStage;
use crate::dispatcher::{EventOutcome, PoolSet};
use crate::errors::DispatchError;
use crate::event::{CorrelationId, Event};
use crate::instrumentation::ThreadInstrumentation;
use crate::metrics::DispatchCounters;
use crate::progress::ProgressTracker;
use crate::retry::{RetryBackoff, RetryQueue};
use crate::shutdown::CompletionLatch;
use crate::stage::Stage;

/// How often parked events re-check for a free permit.
const PARK_POLL: Duration = Duration::from_millis(1);

/// Longest idle wait when there are no timers.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Callback receiving every event's terminal outcome.
pub type CompletionCallback = dyn Fn(EventOutcome) + Send + Sync;

/// Everything the consumers of one pipeline share.
pub(crate) struct PipelineRuntime {
    pub pipeline: String,
    pub stages: Vec<RoutedStage>,
    pub on_complete: Arc<CompletionCallback>,
    pub pools: Arc<PoolSet>,
    pub backoff: RetryBackoff,
    pub instrumentation: ThreadInstrumentation,
    pub counters: Arc<DispatchCounters>,
    pub progress: Arc<ProgressTracker>,
}

/// Result of an offloaded stage, published back onto the loop.
struct Continuation {
    id: CorrelationId,
    stage_index: usize,
    result: Result<Event, DispatchError>,
    permit: Permit,
}

/// One-shot channel back to the consumer carried by an offloaded task.
///
/// If the task is dropped without running, the event is reported cancelled.
struct Reply {
    inner: Option<(Sender<Continuation>, Permit)>,
    id: CorrelationId,
    stage_index: usize,
    pool: String,
}

impl Reply {
    fn send(mut self, result: Result<Event, DispatchError>) {
        if let Some((mailbox, permit)) = self.inner.take() {
            let continuation =
                Continuation { id: self.id, stage_index: self.stage_index, result, permit };
            // The consumer outlives all of its in-flight tasks, so this only fails
            // if the consumer itself panicked.
            let _ = mailbox.send(continuation);
        }
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let Some((mailbox, permit)) = self.inner.take() {
            let _ = mailbox.send(Continuation {
                id: self.id,
                stage_index: self.stage_index,
                result: Err(DispatchError::Cancelled { pool: std::mem::take(&mut self.pool) }),
                permit,
            });
        }
    }
}

/// A task waiting to be (re)submitted to a pool.
struct PendingSubmit {
    id: CorrelationId,
    role: PoolRole,
    task: Task,
}

/// An event waiting for an offload permit.
struct Parked {
    event: Event,
    stage_index: usize,
    role: PoolRole,
}

/// Counts the consumer down on the sink's latch when dropped, whether the
/// consumer finished, panicked or was never run.
struct LatchGuard(Arc<CompletionLatch>);

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.0.count_down();
    }
}

/// A consumer ready to be submitted to the event-loop pool.
pub(crate) struct Consumer {
    index: usize,
    buffer: Receiver<Event>,
    mailbox: Receiver<Continuation>,
    state: LoopState,
    _guard: LatchGuard,
}

struct LoopState {
    runtime: Arc<PipelineRuntime>,
    event_loop_name: String,
    reply_to: Sender<Continuation>,
    in_flight: usize,
    retries: RetryQueue<PendingSubmit>,
    parked: VecDeque<Parked>,
    buffer_open: bool,
}

impl Consumer {
    pub(crate) fn new(
        index: usize,
        runtime: Arc<PipelineRuntime>,
        buffer: Receiver<Event>,
        latch: Arc<CompletionLatch>,
    ) -> Self {
        let (reply_to, mailbox) = unbounded();
        let event_loop_name = runtime.pools.get(PoolRole::EventLoop).name().to_string();
        Self {
            index,
            buffer,
            mailbox,
            state: LoopState {
                runtime,
                event_loop_name,
                reply_to,
                in_flight: 0,
                retries: RetryQueue::new(),
                parked: VecDeque::new(),
                buffer_open: true,
            },
            _guard: LatchGuard(latch),
        }
    }

    /// Wrap the consumer as a pool task.
    pub(crate) fn into_task(self) -> Task {
        Box::new(move || self.run())
    }

    fn run(self) {
        let Consumer { index, buffer, mailbox, mut state, _guard } = self;
        let closed: Receiver<Event> = never();
        debug!("Consumer {} of pipeline '{}' started", index, state.runtime.pipeline);

        loop {
            state.unpark();
            state.fire_due_retries(Instant::now());
            if state.is_finished() {
                break;
            }

            let source = if state.accepts_new_events() { &buffer } else { &closed };
            let timeout = state.next_wakeup(Instant::now());
            select! {
                recv(mailbox) -> msg => {
                    if let Ok(continuation) = msg {
                        state.resume(continuation);
                    }
                }
                recv(source) -> msg => match msg {
                    Ok(event) => state.advance(event, 0),
                    Err(_) => state.buffer_open = false,
                },
                default(timeout) => {}
            }
        }
        debug!("Consumer {} of pipeline '{}' finished", index, state.runtime.pipeline);
    }
}

impl LoopState {
    fn is_finished(&self) -> bool {
        !self.buffer_open && self.in_flight == 0 && self.retries.is_empty() && self.parked.is_empty()
    }

    fn accepts_new_events(&self) -> bool {
        self.buffer_open && self.parked.is_empty()
    }

    fn next_wakeup(&self, now: Instant) -> Duration {
        let mut wait = IDLE_POLL;
        if let Some(due) = self.retries.next_due() {
            wait = wait.min(due.saturating_duration_since(now));
        }
        if !self.parked.is_empty() {
            wait = wait.min(PARK_POLL);
        }
        wait
    }

    /// Run stages from `stage_index` until one must be offloaded or the event ends.
    fn advance(&mut self, mut event: Event, mut stage_index: usize) {
        let runtime = Arc::clone(&self.runtime);
        loop {
            let Some(routed) = runtime.stages.get(stage_index) else {
                self.complete(event.id(), Ok(event));
                return;
            };
            if let Some(role) = routed.target(&event) {
                self.offload(event, stage_index, role);
                return;
            }
            let id = event.id();
            event.set_execution_context(&self.event_loop_name);
            runtime.counters.record_inline();
            match run_stage(routed.stage(), event) {
                Ok(next) => {
                    event = next;
                    stage_index += 1;
                }
                Err(err) => {
                    self.complete(id, Err(err));
                    return;
                }
            }
        }
    }

    fn offload(&mut self, event: Event, stage_index: usize, role: PoolRole) {
        match self.runtime.pools.limiter(role).try_acquire() {
            Some(permit) => self.submit_offload(event, stage_index, role, permit),
            None => self.parked.push_back(Parked { event, stage_index, role }),
        }
    }

    /// Give parked events a permit where one has freed up, oldest first per pool.
    fn unpark(&mut self) {
        if self.parked.is_empty() {
            return;
        }
        let waiting = std::mem::take(&mut self.parked);
        for parked in waiting {
            match self.runtime.pools.limiter(parked.role).try_acquire() {
                Some(permit) => {
                    self.submit_offload(parked.event, parked.stage_index, parked.role, permit);
                }
                None => self.parked.push_back(parked),
            }
        }
    }

    fn submit_offload(&mut self, mut event: Event, stage_index: usize, role: PoolRole, permit: Permit) {
        let pool = self.runtime.pools.get(role);
        let stage: Stage = self.runtime.stages[stage_index].stage().clone();
        let id = event.id();
        let pool_name = pool.name().to_string();
        let reply = Reply {
            inner: Some((self.reply_to.clone(), permit)),
            id,
            stage_index,
            pool: pool_name.clone(),
        };
        let stage_name = stage.name().to_string();
        let task: Task = Box::new(move || {
            event.set_execution_context(&pool_name);
            let result = run_stage(&stage, event);
            reply.send(result);
        });
        let task = self.runtime.instrumentation.wrap(id, pool.name(), &stage_name, task);
        self.in_flight += 1;
        self.submit(PendingSubmit { id, role, task });
    }

    fn submit(&mut self, pending: PendingSubmit) {
        let PendingSubmit { id, role, task } = pending;
        let pool = self.runtime.pools.get(role);
        match pool.try_execute(task) {
            Ok(()) => self.runtime.counters.record_offload(role),
            Err(err) if self.runtime.backoff.should_retry(&err) => {
                trace!(
                    "Shared pool {} is busy. Scheduling of event {} will be retried after {} ms.",
                    err.pool(),
                    id,
                    self.runtime.backoff.interval().as_millis()
                );
                self.runtime.counters.record_retry();
                let due = self.runtime.backoff.next_attempt(Instant::now());
                self.retries.push(due, PendingSubmit { id, role, task: err.into_task() });
            }
            Err(err) => {
                // Dropping the task resolves the event as cancelled.
                debug!("Event {id} not scheduled: {err}");
            }
        }
    }

    fn fire_due_retries(&mut self, now: Instant) {
        while let Some(pending) = self.retries.pop_due(now) {
            self.submit(pending);
        }
    }

    fn resume(&mut self, continuation: Continuation) {
        let Continuation { id, stage_index, result, permit } = continuation;
        self.in_flight -= 1;
        drop(permit);
        match result {
            Ok(event) => self.advance(event, stage_index + 1),
            Err(err) => self.complete(id, Err(err)),
        }
    }

    fn complete(&mut self, id: CorrelationId, result: Result<Event, DispatchError>) {
        let counters = &self.runtime.counters;
        match &result {
            Ok(_) => counters.record_completed(),
            Err(DispatchError::Cancelled { .. }) => counters.record_cancelled(),
            Err(_) => counters.record_failed(),
        }
        self.runtime.progress.log_if_needed(1);

        let outcome = EventOutcome { id, result };
        let on_complete = &self.runtime.on_complete;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| on_complete(outcome))) {
            warn!(
                "Completion callback of pipeline '{}' panicked for event {}: {}",
                self.runtime.pipeline,
                id,
                panic_message(payload.as_ref())
            );
        }
    }
}

/// Apply `stage`, turning a panic into a stage error.
pub(crate) fn run_stage(stage: &Stage, event: Event) -> Result<Event, DispatchError> {
    match catch_unwind(AssertUnwindSafe(|| stage.apply(event))) {
        Ok(result) => result.map_err(DispatchError::Stage),
        Err(payload) => Err(DispatchError::Stage(anyhow::anyhow!(
            "Stage '{}' panicked: {}",
            stage.name(),
            panic_message(payload.as_ref())
        ))),
    }
}
