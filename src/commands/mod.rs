//! CLI command implementations for proactor.
//!
//! - [`simulate`] - drive synthetic events through a dispatcher and report metrics
//! - [`route`] - show where a stage would run for a given payload

#![allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::cast_precision_loss,
    clippy::uninlined_format_args
)]

pub mod command;
pub mod common;
pub mod route;
pub mod simulate;
