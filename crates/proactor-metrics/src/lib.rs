#![deny(unsafe_code)]

//! Structured metric types and TSV writer for dispatcher runs.
//!
//! This crate provides:
//! - [`Metric`] and [`ProcessingMetrics`] traits shared by all metric types
//! - [`dispatch::DispatchMetrics`], the per-pipeline dispatch summary
//! - [`writer`] module for TSV file output

pub mod dispatch;
pub mod writer;

use serde::{Deserialize, Serialize};

pub use dispatch::DispatchMetrics;

/// Number of decimal places used for float metrics.
pub const FLOAT_PRECISION: usize = 6;

/// Formats a float value with the standard precision for metrics.
///
/// # Example
/// ```
/// use proactor_metrics::format_float;
/// assert_eq!(format_float(0.9), "0.900000");
/// assert_eq!(format_float(0.0), "0.000000");
/// ```
#[must_use]
pub fn format_float(value: f64) -> String {
    format!("{value:.FLOAT_PRECISION$}")
}

/// Formats a count with thousands separators, e.g. `1234567` as `1,234,567`.
#[must_use]
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// A metric type that can be serialized to TSV files.
pub trait Metric: Serialize + for<'de> Deserialize<'de> + Clone + Default {
    /// Human-readable name for this metric type.
    ///
    /// Used in error messages and logging when writing metrics files.
    fn metric_name() -> &'static str;
}

/// Common interface for metrics that track processing counts.
pub trait ProcessingMetrics {
    /// Total number of items accepted for processing.
    fn total_input(&self) -> u64;

    /// Total number of items that completed successfully.
    fn total_output(&self) -> u64;

    /// Total number of items rejected, failed or cancelled.
    fn total_filtered(&self) -> u64;

    /// Success rate as a percentage (output / input * 100).
    fn efficiency(&self) -> f64 {
        if self.total_input() == 0 {
            0.0
        } else {
            #[expect(clippy::cast_precision_loss, reason = "event counts never exceed 2^53")]
            let result = self.total_output() as f64 / self.total_input() as f64 * 100.0;
            result
        }
    }
}
