//! Common CLI options shared across commands.
//!
//! Shared argument structures composed into command structs with
//! `#[command(flatten)]`.

use std::time::Duration;

use clap::Args;

use proactor_lib::classifier::DispatchMode;
use proactor_lib::config::{
    DEFAULT_BUFFER_SIZE, DEFAULT_PROGRESS_INTERVAL, DEFAULT_STREAMING_THRESHOLD_BYTES,
    DispatchConfig, OverflowPolicy,
};

/// Dispatcher configuration options.
#[derive(Debug, Clone, Args)]
pub struct DispatchOptions {
    /// Sink buffer capacity in events
    #[arg(long = "buffer-size", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Number of event-loop consumers
    #[arg(long = "consumers", default_value_t = 1)]
    pub consumers: usize,

    /// What producers experience when the buffer is full
    #[arg(long = "overflow-policy", value_enum, default_value_t = OverflowPolicy::default())]
    pub overflow_policy: OverflowPolicy,

    /// Parallelism used to split the concurrency ceiling [default: max(cores, max-concurrency)]
    #[arg(long = "parallelism")]
    pub parallelism: Option<usize>,

    /// Global concurrency ceiling [default: unbounded]
    #[arg(long = "max-concurrency")]
    pub max_concurrency: Option<usize>,

    /// Streamed payloads larger than this many bytes are offloaded by IO stages
    #[arg(long = "streaming-threshold", default_value_t = DEFAULT_STREAMING_THRESHOLD_BYTES)]
    pub streaming_threshold: u64,

    /// Record thread hand-offs per event
    #[arg(long = "thread-instrumentation", default_value_t = false)]
    pub thread_instrumentation: bool,

    /// Maximum time to wait for consumers to drain on stop, in milliseconds
    #[arg(long = "shutdown-timeout-ms", default_value_t = 5000)]
    pub shutdown_timeout_ms: u64,

    /// Delay before resubmitting to a saturated pool, in milliseconds
    #[arg(long = "retry-interval-ms", default_value_t = 2)]
    pub retry_interval_ms: u64,

    /// Routing mode
    #[arg(long = "mode", value_enum, default_value_t = DispatchMode::default())]
    pub mode: DispatchMode,

    /// Threads in the CPU-intensive pool [default: 2 x cores]
    #[arg(long = "cpu-intensive-threads")]
    pub cpu_intensive_threads: Option<usize>,

    /// Threads in the blocking pool [default: 4 x cores]
    #[arg(long = "blocking-threads")]
    pub blocking_threads: Option<usize>,

    /// Queue capacity of the offload pools; 0 hands off directly to an idle thread
    #[arg(long = "pool-queue-capacity", default_value_t = 0)]
    pub pool_queue_capacity: usize,

    /// Completed events between progress log lines
    #[arg(long = "progress-interval", default_value_t = DEFAULT_PROGRESS_INTERVAL)]
    pub progress_interval: u64,
}

impl DispatchOptions {
    /// Build the dispatcher configuration. Validation happens in the dispatcher.
    pub fn to_config(&self) -> DispatchConfig {
        let defaults = DispatchConfig::default();
        DispatchConfig::default()
            .with_buffer_size(self.buffer_size)
            .with_consumer_count(self.consumers)
            .with_overflow_policy(self.overflow_policy)
            .with_parallelism(self.parallelism)
            .with_max_concurrency(self.max_concurrency.unwrap_or(usize::MAX))
            .with_streaming_threshold(self.streaming_threshold)
            .with_thread_instrumentation(self.thread_instrumentation)
            .with_shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms))
            .with_retry_interval(Duration::from_millis(self.retry_interval_ms))
            .with_mode(self.mode)
            .with_pool_threads(
                self.cpu_intensive_threads.unwrap_or(defaults.cpu_intensive_threads),
                self.blocking_threads.unwrap_or(defaults.blocking_threads),
            )
            .with_pool_queue_capacity(self.pool_queue_capacity)
            .with_progress_interval(self.progress_interval)
    }
}
