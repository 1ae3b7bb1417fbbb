//! Pipeline stages and their processing-type tags.

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Static execution characteristics of a stage; drives routing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingType {
    /// Cheap, non-blocking work.
    #[default]
    #[value(name = "light")]
    Light,
    /// CPU-bound work.
    #[value(name = "cpu-intensive")]
    CpuIntensive,
    /// Work that blocks its thread.
    #[value(name = "blocking")]
    Blocking,
    /// Reads or writes the payload; blocking only when the payload is large.
    #[value(name = "io-rw")]
    IoRw,
}

impl ProcessingType {
    /// All tags.
    pub const ALL: [ProcessingType; 4] =
        [Self::Light, Self::CpuIntensive, Self::Blocking, Self::IoRw];

    /// Upper-case tag name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "LIGHT",
            Self::CpuIntensive => "CPU_INTENSIVE",
            Self::Blocking => "BLOCKING",
            Self::IoRw => "IO_RW",
        }
    }
}

impl fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Transform = dyn Fn(Event) -> anyhow::Result<Event> + Send + Sync;

/// A named transform annotated with exactly one [`ProcessingType`].
#[derive(Clone)]
pub struct Stage {
    name: String,
    processing_type: ProcessingType,
    transform: Arc<Transform>,
}

impl Stage {
    /// Build a stage from a fallible transform.
    pub fn new<F>(name: impl Into<String>, processing_type: ProcessingType, transform: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self { name: name.into(), processing_type, transform: Arc::new(transform) }
    }

    /// A [`ProcessingType::Light`] stage.
    pub fn light<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self::new(name, ProcessingType::Light, transform)
    }

    /// A [`ProcessingType::CpuIntensive`] stage.
    pub fn cpu_intensive<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self::new(name, ProcessingType::CpuIntensive, transform)
    }

    /// A [`ProcessingType::Blocking`] stage.
    pub fn blocking<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self::new(name, ProcessingType::Blocking, transform)
    }

    /// A [`ProcessingType::IoRw`] stage.
    pub fn io_rw<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        Self::new(name, ProcessingType::IoRw, transform)
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage tag.
    #[must_use]
    pub fn processing_type(&self) -> ProcessingType {
        self.processing_type
    }

    /// Run the transform.
    ///
    /// # Errors
    /// Whatever the transform returns.
    pub fn apply(&self, event: Event) -> anyhow::Result<Event> {
        (self.transform)(event)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("processing_type", &self.processing_type)
            .finish_non_exhaustive()
    }
}
