//! Interval progress logging for completed events.
//!
//! Consumers of one sink share a tracker; each completed event adds one and a
//! line is logged whenever the running total crosses a multiple of the interval.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::DEFAULT_PROGRESS_INTERVAL;

/// Thread-safe counter that logs at interval milestones.
///
/// # Example
/// ```
/// use proactor_lib::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Pipeline 'orders' completed events").with_interval(100);
/// for _ in 0..250 {
///     tracker.log_if_needed(1); // logs at 100 and 200
/// }
/// tracker.log_final(); // logs "... 250 (complete)"
/// assert_eq!(tracker.count(), 250);
/// ```
#[derive(Debug)]
pub struct ProgressTracker {
    interval: u64,
    message: String,
    count: AtomicU64,
}

impl ProgressTracker {
    /// Tracker logging `message` every [`DEFAULT_PROGRESS_INTERVAL`] items.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: DEFAULT_PROGRESS_INTERVAL, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Set the logging interval (at least one).
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Add `additional` and log every milestone crossed.
    ///
    /// Returns true if the new total sits exactly on a milestone.
    pub fn log_if_needed(&self, additional: u64) -> bool {
        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let total = prev + additional;
        for milestone in (prev / self.interval + 1)..=(total / self.interval) {
            info!("{} {}", self.message, milestone * self.interval);
        }
        total > 0 && total.is_multiple_of(self.interval)
    }

    /// Log the final total unless the last milestone already did.
    pub fn log_final(&self) {
        let total = self.count();
        if total > 0 && !total.is_multiple_of(self.interval) {
            info!("{} {} (complete)", self.message, total);
        }
    }

    /// Items counted so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
