//! Stage routing.
//!
//! The [`StageClassifier`] maps a stage's [`ProcessingType`] onto a [`Route`] once,
//! when the pipeline is built. Only [`Route::Gated`] stages defer part of the
//! decision to run time, where the [`StreamingHeuristic`] looks at each event.

use std::fmt;

use clap::ValueEnum;
use proactor_pool::PoolRole;

use crate::event::{Event, Payload};
use crate::stage::{ProcessingType, Stage};

/// Routing strategy selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum DispatchMode {
    /// Every stage runs on the event loop regardless of its tag.
    #[value(name = "event-loop")]
    EventLoop,
    /// Tags decide whether a stage is offloaded.
    #[default]
    #[value(name = "proactor")]
    Proactor,
}

/// Decides whether a payload is too big to handle on the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingHeuristic {
    threshold_bytes: u64,
}

impl StreamingHeuristic {
    /// Heuristic with the given threshold.
    #[must_use]
    pub fn new(threshold_bytes: u64) -> Self {
        Self { threshold_bytes }
    }

    /// Threshold in bytes.
    #[must_use]
    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_bytes
    }

    /// True iff the payload is a stream longer than the threshold. Unknown length
    /// counts as unbounded.
    #[must_use]
    pub fn is_large_stream(&self, payload: &Payload) -> bool {
        payload.is_stream() && payload.byte_length().unwrap_or(u64::MAX) > self.threshold_bytes
    }
}

/// Where a stage executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// On the event-loop consumer.
    Inline,
    /// Always on the given pool.
    Offload(PoolRole),
    /// On the blocking pool for large streams, otherwise inline.
    Gated,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::Offload(role) => write!(f, "offload to {role}"),
            Self::Gated => f.write_str("inline unless large stream"),
        }
    }
}

/// Maps processing types onto routes for one [`DispatchMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageClassifier {
    mode: DispatchMode,
}

impl StageClassifier {
    /// Classifier for `mode`.
    #[must_use]
    pub fn new(mode: DispatchMode) -> Self {
        Self { mode }
    }

    /// The mode this classifier routes for.
    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Route for a stage tagged `tag`.
    #[must_use]
    pub fn classify(&self, tag: ProcessingType) -> Route {
        match (self.mode, tag) {
            (DispatchMode::EventLoop, _) | (DispatchMode::Proactor, ProcessingType::Light) => {
                Route::Inline
            }
            (DispatchMode::Proactor, ProcessingType::CpuIntensive) => {
                Route::Offload(PoolRole::CpuIntensive)
            }
            (DispatchMode::Proactor, ProcessingType::Blocking) => Route::Offload(PoolRole::Blocking),
            (DispatchMode::Proactor, ProcessingType::IoRw) => Route::Gated,
        }
    }
}

/// A stage bound to its routing decision.
#[derive(Debug, Clone)]
pub struct RoutedStage {
    stage: Stage,
    route: Route,
    heuristic: StreamingHeuristic,
}

impl RoutedStage {
    pub(crate) fn new(stage: Stage, route: Route, heuristic: StreamingHeuristic) -> Self {
        Self { stage, route, heuristic }
    }

    /// The wrapped stage.
    #[must_use]
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// The static route.
    #[must_use]
    pub fn route(&self) -> Route {
        self.route
    }

    /// Pool that should run this stage for `event`, or `None` for inline.
    #[must_use]
    pub fn target(&self, event: &Event) -> Option<PoolRole> {
        self.target_for(event.payload())
    }

    /// Pool that should run this stage for `payload`, or `None` for inline.
    #[must_use]
    pub fn target_for(&self, payload: &Payload) -> Option<PoolRole> {
        match self.route {
            Route::Inline => None,
            Route::Offload(role) => Some(role),
            Route::Gated => self.heuristic.is_large_stream(payload).then_some(PoolRole::Blocking),
        }
    }
}
