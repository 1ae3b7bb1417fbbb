//! Dispatcher configuration.
//!
//! [`DispatchConfig`] is bound once when a dispatcher is built and never changes
//! afterwards. Values are validated up front so the running dispatcher can rely on
//! every count being at least one.

use std::thread;
use std::time::Duration;

use clap::ValueEnum;

use crate::classifier::DispatchMode;
use crate::errors::Result;
use crate::validation::{validate_non_zero_duration, validate_optional_positive, validate_positive};

/// Default sink capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default payload size above which a streamed payload is offloaded.
pub const DEFAULT_STREAMING_THRESHOLD_BYTES: u64 = 16 * 1024;

/// Default delay between resubmissions to a saturated pool.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// Default time `stop()` waits for consumers to drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of completed events between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100_000;

/// What a producer experiences when the sink buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum OverflowPolicy {
    /// Park the producer until space frees up.
    #[default]
    #[value(name = "block")]
    Block,
    /// Retry with exponential sleeps between attempts.
    #[value(name = "sleep")]
    Sleep,
    /// Spin, yielding the thread between attempts.
    #[value(name = "yield")]
    Yield,
    /// Refuse immediately and hand the event back.
    #[value(name = "reject")]
    Reject,
}

/// Immutable dispatcher configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Sink capacity in events.
    pub buffer_size: usize,
    /// Event-loop consumers per sink.
    pub consumer_count: usize,
    /// Behaviour when the sink is full.
    pub overflow_policy: OverflowPolicy,
    /// Explicit parallelism; `None` resolves to `max(cores, max_concurrency)`.
    pub parallelism: Option<usize>,
    /// Global concurrency ceiling.
    pub max_concurrency: usize,
    /// Streamed payloads larger than this are offloaded.
    pub streaming_threshold_bytes: u64,
    /// Record thread hand-offs per event.
    pub thread_instrumentation: bool,
    /// Maximum drain wait on stop.
    pub shutdown_timeout: Duration,
    /// Delay before resubmitting to a saturated pool.
    pub retry_interval: Duration,
    /// Routing mode.
    pub mode: DispatchMode,
    /// Worker threads in the CPU-intensive pool.
    pub cpu_intensive_threads: usize,
    /// Worker threads in the blocking pool.
    pub blocking_threads: usize,
    /// Queue capacity of the offload pools; 0 is a direct hand-off.
    pub pool_queue_capacity: usize,
    /// Completed events between progress log lines.
    pub progress_interval: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let cores = available_cores();
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            consumer_count: 1,
            overflow_policy: OverflowPolicy::Block,
            parallelism: None,
            max_concurrency: usize::MAX,
            streaming_threshold_bytes: DEFAULT_STREAMING_THRESHOLD_BYTES,
            thread_instrumentation: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            mode: DispatchMode::Proactor,
            cpu_intensive_threads: cores * 2,
            blocking_threads: cores * 4,
            pool_queue_capacity: 0,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl DispatchConfig {
    /// Set the sink capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the number of event-loop consumers.
    #[must_use]
    pub fn with_consumer_count(mut self, consumer_count: usize) -> Self {
        self.consumer_count = consumer_count;
        self
    }

    /// Set the overflow policy.
    #[must_use]
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Override the resolved parallelism.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: Option<usize>) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the global concurrency ceiling.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the streaming threshold in bytes.
    #[must_use]
    pub fn with_streaming_threshold(mut self, bytes: u64) -> Self {
        self.streaming_threshold_bytes = bytes;
        self
    }

    /// Enable or disable thread hand-off recording.
    #[must_use]
    pub fn with_thread_instrumentation(mut self, enabled: bool) -> Self {
        self.thread_instrumentation = enabled;
        self
    }

    /// Set the drain timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the saturation retry interval.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the routing mode.
    #[must_use]
    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Size the two offload pools.
    #[must_use]
    pub fn with_pool_threads(mut self, cpu_intensive: usize, blocking: usize) -> Self {
        self.cpu_intensive_threads = cpu_intensive;
        self.blocking_threads = blocking;
        self
    }

    /// Set the offload pools' queue capacity.
    #[must_use]
    pub fn with_pool_queue_capacity(mut self, capacity: usize) -> Self {
        self.pool_queue_capacity = capacity;
        self
    }

    /// Set the progress logging interval.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Check every value is usable.
    ///
    /// # Errors
    /// Returns [`crate::errors::DispatchError::InvalidParameter`] naming the first bad value
    pub fn validate(&self) -> Result<()> {
        validate_positive(self.buffer_size, "buffer-size")?;
        validate_positive(self.consumer_count, "consumer-count")?;
        validate_optional_positive(self.parallelism, "parallelism")?;
        validate_positive(self.max_concurrency, "max-concurrency")?;
        validate_non_zero_duration(self.shutdown_timeout, "shutdown-timeout")?;
        validate_positive(self.cpu_intensive_threads, "cpu-intensive-threads")?;
        validate_positive(self.blocking_threads, "blocking-threads")?;
        validate_positive(self.progress_interval, "progress-interval")?;
        Ok(())
    }

    /// Parallelism in effect: the override, else `max(cores, max_concurrency)`.
    #[must_use]
    pub fn resolved_parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(|| available_cores().max(self.max_concurrency))
    }

    /// Consumers actually started per sink: `min(max_concurrency, consumer_count)`.
    #[must_use]
    pub fn effective_consumer_count(&self) -> usize {
        self.max_concurrency.min(self.consumer_count).max(1)
    }

    /// Per-pool offload bound: `max(max_concurrency / (parallelism * consumers), 1)`.
    #[must_use]
    pub fn offload_concurrency(&self) -> usize {
        let divisor = self.resolved_parallelism().saturating_mul(self.consumer_count).max(1);
        (self.max_concurrency / divisor).max(1)
    }
}

/// Number of cores the process may use, at least one.
#[must_use]
pub fn available_cores() -> usize {
    thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}
