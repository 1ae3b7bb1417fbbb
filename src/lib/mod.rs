#![deny(unsafe_code)]
// Clippy lint configuration for CI
// - cast_*: counters and peaks move between usize and u64
// - missing_*_doc: error sections are documented where non-obvious
// - needless_pass_by_value: events and stages are moved on purpose
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::needless_pass_by_value,
    clippy::items_after_statements,
    clippy::too_many_lines,
    clippy::redundant_closure_for_method_calls,
    clippy::uninlined_format_args
)]

//! # proactor - processing-type-aware event dispatcher
//!
//! Routes every stage of an event pipeline onto the execution context its
//! processing type calls for: the event loop for light work, a CPU-intensive pool
//! for CPU-bound work and a blocking pool for blocking or large streaming IO.
//!
//! ## Overview
//!
//! ### Core
//!
//! - **[`dispatcher`]** - [`ProactorDispatcher`](dispatcher::ProactorDispatcher), pipelines and outcomes
//! - **[`sink`]** - bounded ingestion buffer with overflow policies
//! - **[`event_loop`]** - consumers that sequence stages and publish continuations
//! - **[`classifier`]** - stage routing and the streaming heuristic
//! - **[`retry`]** - resubmission of work rejected by saturated pools
//! - **[`shutdown`]** - drain coordination with a timeout
//!
//! ### Model
//!
//! - **[`event`]** - events, payloads and correlation ids
//! - **[`stage`]** - stages and processing types
//! - **[`config`]** - dispatcher configuration
//!
//! ### Utilities
//!
//! - **[`instrumentation`]** - optional thread hand-off recording
//! - **[`metrics`]** - dispatch counters and TSV output
//! - **[`progress`]** - interval progress logging
//! - **[`logging`]** - formatting helpers and summaries
//! - **[`validation`]** - parameter validation
//! - **[`errors`]** - error types
//!
//! ## Quick Start
//!
//! ```no_run
//! use proactor_lib::config::DispatchConfig;
//! use proactor_lib::dispatcher::{Pipeline, ProactorDispatcher};
//! use proactor_lib::event::{Event, Payload};
//! use proactor_lib::stage::Stage;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dispatcher = ProactorDispatcher::new("ingest", DispatchConfig::default())?;
//! dispatcher.start()?;
//!
//! let pipeline = Pipeline::new()
//!     .then(Stage::light("parse", Ok))
//!     .then(Stage::io_rw("store", Ok))
//!     .on_complete(|outcome| println!("{} done: {}", outcome.id, outcome.is_success()));
//! let sink = dispatcher.create_sink("ingest", pipeline)?;
//!
//! sink.submit(Event::new(Payload::stream(Vec::new(), Some(1 << 20))))?;
//! dispatcher.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod event_loop;
pub mod instrumentation;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod stage;
pub mod validation;

pub use classifier::{DispatchMode, Route, RoutedStage, StageClassifier, StreamingHeuristic};
pub use config::{DispatchConfig, OverflowPolicy};
pub use dispatcher::{EventOutcome, Pipeline, ProactorDispatcher};
pub use errors::{DispatchError, Result, SinkError};
pub use event::{CorrelationId, Event, Payload};
pub use proactor_pool::{PoolRole, PoolSpec, ThreadPoolFactory, WorkerPool, WorkerPoolFactory};
pub use shutdown::{DrainOutcome, ShutdownInterrupt, ShutdownState};
pub use sink::Sink;
pub use stage::{ProcessingType, Stage};
