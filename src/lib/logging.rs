//! Formatting helpers and summaries for log output.

use std::time::{Duration, Instant};

use proactor_metrics::{DispatchMetrics, ProcessingMetrics, format_count};

/// Formats a fraction as a percentage, e.g. `0.9543` with 2 decimals as `95.43%`.
///
/// ```
/// use proactor_lib::logging::format_percent;
///
/// assert_eq!(format_percent(0.9543, 2), "95.43%");
/// assert_eq!(format_percent(1.0, 0), "100%");
/// ```
#[must_use]
pub fn format_percent(value: f64, decimals: usize) -> String {
    format!("{:.decimals$}%", value * 100.0)
}

/// Formats a duration for humans.
///
/// Sub-second durations are shown in milliseconds since drain waits and retry
/// intervals are usually that short.
///
/// ```
/// use proactor_lib::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// assert_eq!(format_duration(Duration::from_secs(45)), "45s");
/// assert_eq!(format_duration(Duration::from_secs(135)), "2m 15s");
/// assert_eq!(format_duration(Duration::from_secs(5400)), "1h 30m");
/// ```
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let (mins, rem) = (secs / 60, secs % 60);
        if rem == 0 { format!("{mins}m") } else { format!("{mins}m {rem}s") }
    } else {
        let (hours, mins) = (secs / 3600, (secs % 3600) / 60);
        if mins == 0 { format!("{hours}h") } else { format!("{hours}h {mins}m") }
    }
}

/// Formats a throughput, e.g. `1,000 events/s`.
///
/// ```
/// use proactor_lib::logging::format_rate;
/// use std::time::Duration;
///
/// assert_eq!(format_rate(1000, Duration::from_secs(1)), "1,000 events/s");
/// assert_eq!(format_rate(30, Duration::from_secs(60)), "30.0 events/min");
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_rate(count: u64, duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 0.001 {
        return format!("{} events/s", format_count(count));
    }
    let rate = count as f64 / secs;
    if rate >= 1.0 {
        format!("{} events/s", format_count(rate as u64))
    } else {
        format!("{:.1} events/min", count as f64 / (secs / 60.0))
    }
}

/// Logs the start of an operation and, later, its completion with count and rate.
///
/// ```
/// use proactor_lib::logging::OperationTimer;
///
/// let timer = OperationTimer::new("Dispatching events");
/// timer.log_completion(10_000);
/// ```
pub struct OperationTimer {
    operation: String,
    start_time: Instant,
}

impl OperationTimer {
    /// Start timing and log "<operation> ...".
    #[must_use]
    pub fn new(operation: &str) -> Self {
        log::info!("{operation} ...");
        Self { operation: operation.to_string(), start_time: Instant::now() }
    }

    /// Time since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log completion with the number of events handled.
    pub fn log_completion(&self, count: u64) {
        let duration = self.elapsed();
        log::info!(
            "{} completed: {} in {} ({})",
            self.operation,
            format_count(count),
            format_duration(duration),
            format_rate(count, duration)
        );
    }
}

/// Logs a summary of one pipeline's dispatch metrics.
#[allow(clippy::cast_precision_loss)]
pub fn log_dispatch_summary(metrics: &DispatchMetrics) {
    log::info!("Dispatch Summary for pipeline '{}':", metrics.pipeline);
    log::info!("  Submitted events: {}", format_count(metrics.events_submitted));
    log::info!("  Completed events: {}", format_count(metrics.events_completed));
    if metrics.total_filtered() > 0 {
        log::info!("  Rejected by sink: {}", format_count(metrics.events_rejected));
        log::info!("  Failed: {}", format_count(metrics.events_failed));
        log::info!("  Cancelled: {}", format_count(metrics.events_cancelled));
    }
    if metrics.events_submitted > 0 {
        log::info!("  Success rate: {}", format_percent(metrics.efficiency() / 100.0, 2));
    }
    log::info!("  Inline executions: {}", format_count(metrics.inline_executions));
    log::info!(
        "  Offloads: {} cpu-intensive (peak {} in flight), {} blocking (peak {} in flight)",
        format_count(metrics.cpu_intensive_offloads),
        metrics.peak_cpu_intensive_in_flight,
        format_count(metrics.blocking_offloads),
        metrics.peak_blocking_in_flight,
    );
    if metrics.saturation_retries > 0 {
        log::info!("  Saturation retries: {}", format_count(metrics.saturation_retries));
    }
}
