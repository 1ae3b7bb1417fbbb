//! Bounded ingestion buffer in front of a pipeline's event-loop consumers.
//!
//! Producers call [`Sink::submit`]; the sink's bounded channel is shared by all
//! consumers, so whichever consumer is free takes the next event. When the buffer
//! is full the configured [`OverflowPolicy`] decides what the producer sees.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use rand::Rng;

use crate::config::OverflowPolicy;
use crate::errors::{Result, SinkError};
use crate::event::Event;
use crate::metrics::{DispatchCounters, DispatchMetrics};
use crate::progress::ProgressTracker;
use crate::shutdown::{DrainOutcome, ShutdownCoordinator, ShutdownInterrupt, ShutdownState};

/// Shortest producer sleep under [`OverflowPolicy::Sleep`], in microseconds.
pub const MIN_BACKOFF_US: u64 = 10;

/// Longest producer sleep under [`OverflowPolicy::Sleep`], in microseconds.
pub const MAX_BACKOFF_US: u64 = 1000;

/// How often a blocked producer re-checks whether the sink was closed.
const BLOCK_POLL: Duration = Duration::from_millis(10);

pub(crate) struct SinkInner {
    pipeline: String,
    policy: OverflowPolicy,
    capacity: usize,
    sender: RwLock<Option<Sender<Event>>>,
    buffer: Receiver<Event>,
    coordinator: ShutdownCoordinator,
    counters: Arc<DispatchCounters>,
    progress: Arc<ProgressTracker>,
}

/// Producer handle for one pipeline. Cloning shares the sink.
#[derive(Clone)]
pub struct Sink {
    inner: Arc<SinkInner>,
}

impl Sink {
    pub(crate) fn new(
        pipeline: String,
        policy: OverflowPolicy,
        sender: Sender<Event>,
        buffer: Receiver<Event>,
        coordinator: ShutdownCoordinator,
        counters: Arc<DispatchCounters>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        let capacity = sender.capacity().unwrap_or(usize::MAX);
        Self {
            inner: Arc::new(SinkInner {
                pipeline,
                policy,
                capacity,
                sender: RwLock::new(Some(sender)),
                buffer,
                coordinator,
                counters,
                progress,
            }),
        }
    }

    /// Pipeline id.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.inner.pipeline
    }

    /// Buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Events waiting in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.buffer.len()
    }

    /// True if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.buffer.is_empty()
    }

    /// True once [`Sink::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.coordinator.state() != ShutdownState::Running
    }

    /// Consumers that have not exited yet. Non-zero after a timed-out close while
    /// the stragglers still hold event-loop threads.
    #[must_use]
    pub fn running_consumers(&self) -> usize {
        self.inner.coordinator.latch().remaining()
    }

    /// Shutdown state.
    #[must_use]
    pub fn state(&self) -> ShutdownState {
        self.inner.coordinator.state()
    }

    /// Handle that interrupts a thread blocked in [`Sink::close`].
    #[must_use]
    pub fn interrupt_handle(&self) -> ShutdownInterrupt {
        self.inner.coordinator.interrupt_handle()
    }

    /// Snapshot of this pipeline's counters. Peak in-flight values are left at zero;
    /// the dispatcher fills them in.
    #[must_use]
    pub fn counters(&self) -> DispatchMetrics {
        self.inner.counters.snapshot(&self.inner.pipeline, 0, 0)
    }

    /// Offer an event to the pipeline.
    ///
    /// # Errors
    /// Returns the event inside [`SinkError::Full`] when the buffer is full and the
    /// policy is [`OverflowPolicy::Reject`], or inside [`SinkError::Closed`] once the
    /// sink is closing.
    pub fn submit(&self, event: Event) -> std::result::Result<(), SinkError> {
        let Some(sender) = self.sender() else {
            return Err(self.rejected(SinkError::Closed {
                pipeline: self.inner.pipeline.clone(),
                event: Box::new(event),
            }));
        };
        let result = match self.inner.policy {
            OverflowPolicy::Block => self.send_blocking(&sender, event),
            OverflowPolicy::Reject => self.send_or_reject(&sender, event),
            OverflowPolicy::Sleep | OverflowPolicy::Yield => self.send_spinning(&sender, event),
        };
        match result {
            Ok(()) => {
                self.inner.counters.record_submitted();
                Ok(())
            }
            Err(err) => Err(self.rejected(err)),
        }
    }

    /// Stop accepting events and wait for the consumers to drain.
    ///
    /// Waits at most the configured shutdown timeout; a timeout is logged and
    /// reported in the outcome rather than failing. Calling again after a completed
    /// close returns the same outcome.
    ///
    /// # Errors
    /// Returns [`crate::errors::DispatchError::InterruptedShutdown`] if the wait is
    /// interrupted through [`Sink::interrupt_handle`].
    pub fn close(&self) -> Result<DrainOutcome> {
        if self.inner.coordinator.begin_drain() {
            drop(self.inner.sender.write().take());
        }
        let already_stopped = self.inner.coordinator.state() == ShutdownState::Stopped;
        let outcome = self.inner.coordinator.await_drain()?;
        if !already_stopped {
            self.inner.progress.log_final();
        }
        Ok(outcome)
    }

    fn sender(&self) -> Option<Sender<Event>> {
        self.inner.sender.read().as_ref().cloned()
    }

    fn rejected(&self, err: SinkError) -> SinkError {
        self.inner.counters.record_rejected();
        err
    }

    fn closed(&self, event: Event) -> SinkError {
        SinkError::Closed { pipeline: self.inner.pipeline.clone(), event: Box::new(event) }
    }

    fn full(&self, event: Event) -> SinkError {
        SinkError::Full { pipeline: self.inner.pipeline.clone(), event: Box::new(event) }
    }

    fn send_or_reject(&self, sender: &Sender<Event>, event: Event) -> std::result::Result<(), SinkError> {
        sender.try_send(event).map_err(|err| match err {
            TrySendError::Full(event) => self.full(event),
            TrySendError::Disconnected(event) => self.closed(event),
        })
    }

    fn send_blocking(&self, sender: &Sender<Event>, mut event: Event) -> std::result::Result<(), SinkError> {
        loop {
            match sender.send_timeout(event, BLOCK_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) if !self.is_closed() => event = back,
                Err(SendTimeoutError::Timeout(back) | SendTimeoutError::Disconnected(back)) => {
                    return Err(self.closed(back));
                }
            }
        }
    }

    fn send_spinning(&self, sender: &Sender<Event>, mut event: Event) -> std::result::Result<(), SinkError> {
        let mut backoff_us = MIN_BACKOFF_US;
        loop {
            match sender.try_send(event) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) if !self.is_closed() => event = back,
                Err(TrySendError::Full(back) | TrySendError::Disconnected(back)) => {
                    return Err(self.closed(back));
                }
            }
            if self.inner.policy == OverflowPolicy::Yield || backoff_us <= MIN_BACKOFF_US {
                thread::yield_now();
            } else {
                thread::sleep(Duration::from_micros(jittered(backoff_us)));
            }
            backoff_us = (backoff_us * 2).min(MAX_BACKOFF_US);
        }
    }
}

/// `backoff_us` with up to 25% jitter either way, never below the minimum.
fn jittered(backoff_us: u64) -> u64 {
    let range = backoff_us / 4;
    let low = backoff_us.saturating_sub(range).max(MIN_BACKOFF_US);
    let high = backoff_us.saturating_add(range).max(low);
    rand::rng().random_range(low..=high)
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("pipeline", &self.inner.pipeline)
            .field("policy", &self.inner.policy)
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .field("state", &self.state())
            .finish()
    }
}
