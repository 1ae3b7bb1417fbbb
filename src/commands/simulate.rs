//! Drive synthetic events through a dispatcher and report what happened.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::unbounded;
use fgoxide::io::DelimFile;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use proactor_lib::dispatcher::{Pipeline, ProactorDispatcher};
use proactor_lib::event::{Event, Payload};
use proactor_lib::logging::{OperationTimer, log_dispatch_summary};
use proactor_lib::metrics::write_metrics;
use proactor_lib::stage::{ProcessingType, Stage};
use proactor_lib::validation::{validate_fraction, validate_positive};

use crate::commands::command::Command;
use crate::commands::common::DispatchOptions;

const PIPELINE: &str = "simulation";

/// One stage of a pipeline file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRow {
    /// Stage name
    pub name: String,
    /// Processing type tag
    pub processing_type: ProcessingType,
    /// Simulated work per event, in microseconds
    pub work_us: u64,
}

/// Feed synthetic events through a pipeline of simulated stages.
#[derive(Debug, Parser)]
#[command(
    name = "simulate",
    about = "\x1b[38;5;30m[DISPATCH]\x1b[0m       \x1b[36mRun synthetic events through the proactor dispatcher\x1b[0m",
    long_about = r#"
Run synthetic events through the proactor dispatcher.

Builds a pipeline of simulated stages, either from --stages (one stage per processing
type, each doing --work-us of work) or from a tab-separated --pipeline file with the
columns name, processing_type and work_us. Light stages do nothing, CPU-intensive
stages spin and blocking and IO stages sleep.

Payload sizes are drawn uniformly from [--min-size, --max-size]; --stream-fraction of
the payloads are declared as streams, which IO stages offload when they exceed the
streaming threshold.

Example usage:
  proactor simulate -n 100000 --stages light,cpu-intensive,io-rw --seed 42
  proactor simulate -n 5000 --pipeline stages.tsv --max-concurrency 16 --metrics dispatch.tsv
"#
)]
pub struct Simulate {
    /// Number of events to submit
    #[arg(short = 'n', long = "events", default_value_t = 10_000)]
    pub events: u64,

    /// Processing types of the pipeline stages, in order
    #[arg(
        long = "stages",
        value_enum,
        value_delimiter = ',',
        default_value = "light,cpu-intensive,io-rw,blocking",
        conflicts_with = "pipeline"
    )]
    pub stages: Vec<ProcessingType>,

    /// Tab-separated pipeline file (name, processing_type, work_us)
    #[arg(long = "pipeline")]
    pub pipeline: Option<PathBuf>,

    /// Simulated work per non-light stage, in microseconds
    #[arg(long = "work-us", default_value_t = 50)]
    pub work_us: u64,

    /// Smallest payload in bytes
    #[arg(long = "min-size", default_value_t = 64)]
    pub min_size: u64,

    /// Largest payload in bytes
    #[arg(long = "max-size", default_value_t = 65_536)]
    pub max_size: u64,

    /// Fraction of payloads declared as streams
    #[arg(long = "stream-fraction", default_value_t = 0.5)]
    pub stream_fraction: f64,

    /// Random seed for reproducibility
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Optional output TSV for dispatch metrics
    #[arg(long = "metrics")]
    pub metrics: Option<PathBuf>,

    /// Dispatcher options
    #[command(flatten)]
    pub dispatch: DispatchOptions,
}

impl Simulate {
    fn stage_rows(&self) -> Result<Vec<StageRow>> {
        let rows = match &self.pipeline {
            Some(path) => DelimFile::default()
                .read_tsv(path)
                .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?,
            None => self
                .stages
                .iter()
                .enumerate()
                .map(|(i, tag)| StageRow {
                    name: format!("stage-{}-{}", i + 1, tag.to_string().to_lowercase()),
                    processing_type: *tag,
                    work_us: self.work_us,
                })
                .collect(),
        };
        if rows.is_empty() {
            bail!("The pipeline has no stages");
        }
        Ok(rows)
    }

    fn random_payload(&self, rng: &mut StdRng) -> Payload {
        let size = rng.random_range(self.min_size..=self.max_size);
        if rng.random_bool(self.stream_fraction) {
            Payload::stream(Vec::new(), Some(size))
        } else {
            Payload::bytes(vec![0; usize::try_from(size).unwrap_or(usize::MAX)])
        }
    }
}

/// Build a stage that simulates `row.work_us` of work of its kind.
pub fn simulated_stage(row: &StageRow) -> Stage {
    let work = Duration::from_micros(row.work_us);
    match row.processing_type {
        ProcessingType::Light => Stage::light(row.name.clone(), Ok),
        ProcessingType::CpuIntensive => Stage::cpu_intensive(row.name.clone(), move |event| {
            let start = Instant::now();
            while start.elapsed() < work {
                std::hint::spin_loop();
            }
            Ok(event)
        }),
        tag @ (ProcessingType::Blocking | ProcessingType::IoRw) => {
            Stage::new(row.name.clone(), tag, move |event| {
                thread::sleep(work);
                Ok(event)
            })
        }
    }
}

impl Command for Simulate {
    fn execute(&self, _command_line: &str) -> Result<()> {
        validate_positive(self.events, "events")?;
        validate_fraction(self.stream_fraction, "stream-fraction")?;
        if self.min_size > self.max_size {
            bail!("--min-size ({}) must not exceed --max-size ({})", self.min_size, self.max_size);
        }

        let rows = self.stage_rows()?;
        info!("Starting Simulate");
        for row in &rows {
            info!("  Stage '{}': {} ({}us)", row.name, row.processing_type, row.work_us);
        }

        let dispatcher = ProactorDispatcher::new("simulate", self.dispatch.to_config())?;
        dispatcher.start()?;

        let (done_tx, done_rx) = unbounded();
        let pipeline = rows
            .iter()
            .fold(Pipeline::new(), |pipeline, row| pipeline.then(simulated_stage(row)))
            .on_complete(move |outcome| {
                // The receiver lives until every accepted event is accounted for.
                let _ = done_tx.send(outcome.is_success());
            });
        let sink = dispatcher.create_sink(PIPELINE, pipeline)?;

        let mut rng = self.seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let timer = OperationTimer::new("Dispatching simulated events");
        let mut accepted = 0u64;
        for _ in 0..self.events {
            match sink.submit(Event::new(self.random_payload(&mut rng))) {
                Ok(()) => accepted += 1,
                Err(err) => warn!("{err}"),
            }
        }

        let mut failed = 0u64;
        for _ in 0..accepted {
            if !done_rx.recv().context("Dispatcher stopped before all events completed")? {
                failed += 1;
            }
        }
        dispatcher.stop()?;
        timer.log_completion(accepted);

        let metrics = dispatcher.metrics(PIPELINE).context("No metrics recorded for the simulation")?;
        log_dispatch_summary(&metrics);
        if let Some(path) = &self.metrics {
            write_metrics(path, &[metrics])?;
            info!("Wrote dispatch metrics to {}", path.display());
        }
        if failed > 0 {
            warn!("{failed} event(s) failed");
        }
        Ok(())
    }
}
