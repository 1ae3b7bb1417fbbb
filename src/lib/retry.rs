//! Resubmission of work rejected by a saturated pool.
//!
//! Retries are timers owned by the event-loop consumer: the rejected task goes into
//! a [`RetryQueue`] and the consumer resubmits it once its deadline passes. Nothing
//! sleeps on a pool thread.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use proactor_pool::SubmitError;

use crate::config::DEFAULT_RETRY_INTERVAL;

/// Fixed-interval retry policy for pool saturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    interval: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL)
    }
}

impl RetryBackoff {
    /// Retry every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// The retry interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Only saturation is retried; any other rejection propagates.
    #[must_use]
    pub fn should_retry(&self, error: &SubmitError) -> bool {
        error.is_saturation()
    }

    /// When a task rejected at `now` should be attempted again.
    #[must_use]
    pub fn next_attempt(&self, now: Instant) -> Instant {
        now + self.interval
    }
}

struct Scheduled<T> {
    due: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

/// Deadline-ordered timer queue; items due at the same instant come out in
/// insertion order.
pub struct RetryQueue<T> {
    heap: BinaryHeap<Reverse<Scheduled<T>>>,
    next_seq: u64,
}

impl<T> Default for RetryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RetryQueue<T> {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_seq: 0 }
    }

    /// Schedule `item` for `due`.
    pub fn push(&mut self, due: Instant, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Scheduled { due, seq, item }));
    }

    /// Earliest deadline, if any.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(s)| s.due)
    }

    /// Remove and return the earliest item if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        if self.next_due()? <= now { self.heap.pop().map(|Reverse(s)| s.item) } else { None }
    }

    /// Number of pending items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
