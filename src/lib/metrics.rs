//! Live dispatch counters.
//!
//! Each sink owns a [`DispatchCounters`] updated from its consumers and producers;
//! [`DispatchCounters::snapshot`] turns it into a serializable
//! [`DispatchMetrics`] row.

use std::sync::atomic::{AtomicU64, Ordering};

use proactor_pool::PoolRole;

pub use proactor_metrics::writer::{read_metrics, write_metrics};
pub use proactor_metrics::{DispatchMetrics, Metric, ProcessingMetrics, format_count, format_float};

/// Atomic counters for one pipeline.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    inline: AtomicU64,
    cpu_intensive: AtomicU64,
    blocking: AtomicU64,
    retries: AtomicU64,
}

impl DispatchCounters {
    /// An event entered the sink.
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// The sink refused an event.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// An event finished every stage.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// An event ended with a stage error.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was abandoned by a stopped pool.
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// A stage ran on the event loop.
    pub fn record_inline(&self) {
        self.inline.fetch_add(1, Ordering::Relaxed);
    }

    /// A stage was accepted by an offload pool.
    pub fn record_offload(&self, role: PoolRole) {
        match role {
            PoolRole::CpuIntensive => self.cpu_intensive.fetch_add(1, Ordering::Relaxed),
            PoolRole::Blocking => self.blocking.fetch_add(1, Ordering::Relaxed),
            PoolRole::EventLoop => self.inline.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// A saturated pool forced a retry.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Events that reached a terminal outcome.
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.cancelled.load(Ordering::Relaxed)
    }

    /// Copy the counters into a metrics row; peak values are supplied by the caller.
    #[must_use]
    pub fn snapshot(&self, pipeline: &str, peak_cpu_intensive: u64, peak_blocking: u64) -> DispatchMetrics {
        DispatchMetrics {
            pipeline: pipeline.to_string(),
            events_submitted: self.submitted.load(Ordering::Relaxed),
            events_rejected: self.rejected.load(Ordering::Relaxed),
            events_completed: self.completed.load(Ordering::Relaxed),
            events_failed: self.failed.load(Ordering::Relaxed),
            events_cancelled: self.cancelled.load(Ordering::Relaxed),
            inline_executions: self.inline.load(Ordering::Relaxed),
            cpu_intensive_offloads: self.cpu_intensive.load(Ordering::Relaxed),
            blocking_offloads: self.blocking.load(Ordering::Relaxed),
            saturation_retries: self.retries.load(Ordering::Relaxed),
            peak_cpu_intensive_in_flight: peak_cpu_intensive,
            peak_blocking_in_flight: peak_blocking,
        }
    }
}
