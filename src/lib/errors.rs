//! Custom error types for dispatcher operations.

use std::io;

use thiserror::Error;

use crate::event::Event;

/// Result type alias for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error type for dispatcher operations
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A worker pool could not be created at start
    #[error("Failed to start pool '{pool}'")]
    PoolStart {
        /// Name of the pool that failed
        pool: String,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// An operation needed pools that have not been started
    #[error("Dispatcher '{dispatcher}' has not been started")]
    NotStarted {
        /// Dispatcher name
        dispatcher: String,
    },

    /// A pool rejected a task because every worker was busy
    #[error("Pool '{pool}' is saturated")]
    PoolSaturated {
        /// Name of the saturated pool
        pool: String,
    },

    /// An event was abandoned because its pool stopped before running it
    #[error("Event cancelled: pool '{pool}' stopped before executing it")]
    Cancelled {
        /// Name of the stopped pool
        pool: String,
    },

    /// The pipeline runs in a context the dispatcher cannot serve
    #[error(
        "Pipeline '{pipeline}' is transactional; offloading across threads breaks transaction affinity"
    )]
    UnsupportedContext {
        /// Pipeline id
        pipeline: String,
    },

    /// A drain wait was interrupted
    #[error("Interrupted while waiting for pipeline '{pipeline}' to drain")]
    InterruptedShutdown {
        /// Pipeline id
        pipeline: String,
    },

    /// Failure raised by a pipeline stage, passed through unchanged
    #[error(transparent)]
    Stage(#[from] anyhow::Error),
}

impl DispatchError {
    /// Shorthand for [`DispatchError::InvalidParameter`].
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter { parameter: parameter.into(), reason: reason.into() }
    }

    /// True for errors raised by a stage rather than by the dispatcher.
    #[must_use]
    pub fn is_stage_failure(&self) -> bool {
        matches!(self, Self::Stage(_))
    }
}

/// Error returned to a producer whose event the sink did not accept.
///
/// The event is always handed back.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Buffer full and the overflow policy rejects
    #[error("Sink for pipeline '{pipeline}' is full")]
    Full {
        /// Pipeline id
        pipeline: String,
        /// The rejected event
        event: Box<Event>,
    },

    /// The sink is closed or draining
    #[error("Sink for pipeline '{pipeline}' is closed")]
    Closed {
        /// Pipeline id
        pipeline: String,
        /// The rejected event
        event: Box<Event>,
    },
}

impl SinkError {
    /// Recover the rejected event.
    #[must_use]
    pub fn into_event(self) -> Event {
        match self {
            Self::Full { event, .. } | Self::Closed { event, .. } => *event,
        }
    }

    /// True if the sink refused the event because it was full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}
