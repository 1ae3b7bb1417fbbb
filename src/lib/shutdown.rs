//! Drain coordination for sink shutdown.
//!
//! Every consumer of a sink holds one count on a [`CompletionLatch`] and releases it
//! exactly once when it exits. Closing the sink moves its [`ShutdownCoordinator`]
//! from running to draining and waits on the latch against a deadline fixed when the
//! wait starts, so the remaining time can never go negative.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::errors::{DispatchError, Result};
use crate::logging::format_duration;

/// Lifecycle of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownState {
    /// Accepting events.
    Running,
    /// Refusing new events, waiting for consumers.
    Draining,
    /// Consumers drained or the timeout elapsed.
    Stopped,
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "RUNNING",
            Self::Draining => "DRAINING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every consumer signalled completion.
    Drained {
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The timeout elapsed first.
    TimedOut {
        /// Time spent waiting.
        elapsed: Duration,
        /// Consumers still running.
        pending: usize,
    },
}

impl DrainOutcome {
    /// True if the drain gave up on the timeout.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Time spent waiting.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Drained { elapsed } | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

/// The waiter was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

struct LatchState {
    remaining: usize,
    interrupted: bool,
}

/// Countdown latch with an interrupt flag.
pub struct CompletionLatch {
    state: Mutex<LatchState>,
    changed: Condvar,
}

impl CompletionLatch {
    /// Latch expecting `count` completions.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(LatchState { remaining: count, interrupted: false }),
            changed: Condvar::new(),
        }
    }

    /// Record one completion. Extra calls after zero are ignored.
    pub fn count_down(&self) {
        let mut state = self.state.lock();
        if state.remaining > 0 {
            state.remaining -= 1;
            if state.remaining == 0 {
                self.changed.notify_all();
            }
        }
    }

    /// Completions still outstanding.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }

    /// Wake every waiter with [`Interrupted`]. Stays set until cleared.
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.changed.notify_all();
    }

    /// Reset the interrupt flag.
    pub fn clear_interrupt(&self) {
        self.state.lock().interrupted = false;
    }

    /// True if the interrupt flag is set.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }

    /// Wait until the count reaches zero or `deadline` passes.
    ///
    /// Returns `Ok(true)` when drained and `Ok(false)` on timeout. A drained latch
    /// wins over a pending interrupt.
    pub fn wait_until(&self, deadline: Instant) -> std::result::Result<bool, Interrupted> {
        let mut state = self.state.lock();
        while state.remaining > 0 {
            if state.interrupted {
                return Err(Interrupted);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.changed.wait_until(&mut state, deadline);
        }
        Ok(true)
    }
}

impl fmt::Debug for CompletionLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CompletionLatch")
            .field("remaining", &state.remaining)
            .field("interrupted", &state.interrupted)
            .finish()
    }
}

/// Handle that interrupts a thread blocked in a drain wait.
#[derive(Debug, Clone)]
pub struct ShutdownInterrupt {
    latch: Arc<CompletionLatch>,
}

impl ShutdownInterrupt {
    /// Interrupt current and future drain waits until [`ShutdownInterrupt::clear`].
    pub fn trigger(&self) {
        self.latch.interrupt();
    }

    /// Restore normal waiting.
    pub fn clear(&self) {
        self.latch.clear_interrupt();
    }

    /// True while the interrupt is set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.latch.is_interrupted()
    }
}

/// Tracks one sink's consumers through `RUNNING -> DRAINING -> STOPPED`.
pub struct ShutdownCoordinator {
    pipeline: String,
    timeout: Duration,
    latch: Arc<CompletionLatch>,
    state: Mutex<ShutdownState>,
    outcome: Mutex<Option<DrainOutcome>>,
}

impl ShutdownCoordinator {
    /// Coordinator for `consumers` consumers of `pipeline`.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, consumers: usize, timeout: Duration) -> Self {
        Self {
            pipeline: pipeline.into(),
            timeout,
            latch: Arc::new(CompletionLatch::new(consumers)),
            state: Mutex::new(ShutdownState::Running),
            outcome: Mutex::new(None),
        }
    }

    /// Pipeline id.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// The latch consumers count down.
    #[must_use]
    pub fn latch(&self) -> &Arc<CompletionLatch> {
        &self.latch
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ShutdownState {
        *self.state.lock()
    }

    /// Handle for interrupting a drain wait.
    #[must_use]
    pub fn interrupt_handle(&self) -> ShutdownInterrupt {
        ShutdownInterrupt { latch: Arc::clone(&self.latch) }
    }

    /// Move from running to draining. Returns false if already past running.
    pub fn begin_drain(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ShutdownState::Running {
            *state = ShutdownState::Draining;
            debug!("Pipeline '{}' draining", self.pipeline);
            true
        } else {
            false
        }
    }

    /// Wait for consumers to drain, at most the configured timeout.
    ///
    /// A timeout is logged and reported in the outcome; it is not an error. Once
    /// stopped, later calls return the first outcome without waiting.
    ///
    /// # Errors
    /// Returns [`DispatchError::InterruptedShutdown`] if the wait is interrupted; the
    /// coordinator stays draining so the wait can be retried.
    pub fn await_drain(&self) -> Result<DrainOutcome> {
        if let Some(outcome) = *self.outcome.lock() {
            return Ok(outcome);
        }
        let start = Instant::now();
        let deadline = start + self.timeout;
        let drained = self.latch.wait_until(deadline).map_err(|Interrupted| {
            DispatchError::InterruptedShutdown { pipeline: self.pipeline.clone() }
        })?;
        let elapsed = start.elapsed();

        let mut outcome_slot = self.outcome.lock();
        if let Some(outcome) = *outcome_slot {
            return Ok(outcome);
        }
        let outcome = if drained {
            DrainOutcome::Drained { elapsed }
        } else {
            let pending = self.latch.remaining();
            warn!(
                "Pipeline '{}' did not drain within {} ({} consumer(s) still running after {}); stopping anyway",
                self.pipeline,
                format_duration(self.timeout),
                pending,
                format_duration(elapsed),
            );
            DrainOutcome::TimedOut { elapsed, pending }
        };
        *outcome_slot = Some(outcome);
        *self.state.lock() = ShutdownState::Stopped;
        Ok(outcome)
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("pipeline", &self.pipeline)
            .field("timeout", &self.timeout)
            .field("state", &self.state())
            .field("latch", &self.latch)
            .finish()
    }
}
