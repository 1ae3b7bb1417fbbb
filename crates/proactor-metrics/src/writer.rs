//! TSV output and input for metric rows.
//!
//! Each file holds one [`Metric`] type: a header naming the fields, then one row
//! per pipeline (or per run). Errors carry the metric name and the path.

use anyhow::{Context, Result};
use fgoxide::io::DelimFile;
use std::path::Path;

use crate::Metric;

/// Write `rows` to `path` as TSV.
///
/// # Errors
/// Returns an error naming the metric and path if the file cannot be written
///
/// # Example
/// ```no_run
/// use proactor_metrics::writer::write_metrics;
/// use proactor_metrics::DispatchMetrics;
///
/// write_metrics("dispatch.tsv", &[DispatchMetrics::new("orders")]).unwrap();
/// ```
pub fn write_metrics<P: AsRef<Path>, M: Metric>(path: P, rows: &[M]) -> Result<()> {
    let path = path.as_ref();
    DelimFile::default()
        .write_tsv(&path, rows)
        .with_context(|| format!("Failed to write {} metrics: {}", M::metric_name(), path.display()))
}

/// Read rows previously written by [`write_metrics`].
///
/// # Errors
/// Returns an error naming the metric and path if the file is missing or malformed
pub fn read_metrics<P: AsRef<Path>, M: Metric>(path: P) -> Result<Vec<M>> {
    let path = path.as_ref();
    DelimFile::default()
        .read_tsv(&path)
        .with_context(|| format!("Failed to read {} metrics: {}", M::metric_name(), path.display()))
}
