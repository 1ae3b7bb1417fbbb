//! Per-pipeline dispatch summary.

use serde::{Deserialize, Serialize};

use crate::{Metric, ProcessingMetrics};

/// Counts describing how a pipeline's events were dispatched.
///
/// One row is produced per pipeline when the dispatcher stops, or on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetrics {
    /// Pipeline the counts belong to.
    pub pipeline: String,
    /// Events accepted by the sink.
    pub events_submitted: u64,
    /// Events the sink refused because its buffer was full or closed.
    pub events_rejected: u64,
    /// Events whose stages all completed.
    pub events_completed: u64,
    /// Events that ended with a stage error.
    pub events_failed: u64,
    /// Events abandoned because a pool stopped before running them.
    pub events_cancelled: u64,
    /// Stage executions run on the consumer thread.
    pub inline_executions: u64,
    /// Stage executions handed to the CPU-intensive pool.
    pub cpu_intensive_offloads: u64,
    /// Stage executions handed to the blocking pool.
    pub blocking_offloads: u64,
    /// Submissions retried after a pool reported saturation.
    pub saturation_retries: u64,
    /// Most CPU-intensive tasks outstanding at once.
    pub peak_cpu_intensive_in_flight: u64,
    /// Most blocking tasks outstanding at once.
    pub peak_blocking_in_flight: u64,
}

impl DispatchMetrics {
    /// Create an empty row for `pipeline`.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self { pipeline: pipeline.into(), ..Self::default() }
    }

    /// Total stage executions that left the consumer thread.
    #[must_use]
    pub fn total_offloads(&self) -> u64 {
        self.cpu_intensive_offloads + self.blocking_offloads
    }
}

impl Metric for DispatchMetrics {
    fn metric_name() -> &'static str {
        "dispatch"
    }
}

impl ProcessingMetrics for DispatchMetrics {
    fn total_input(&self) -> u64 {
        self.events_submitted
    }

    fn total_output(&self) -> u64 {
        self.events_completed
    }

    fn total_filtered(&self) -> u64 {
        self.events_rejected + self.events_failed + self.events_cancelled
    }
}
