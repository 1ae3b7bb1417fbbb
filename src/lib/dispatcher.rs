//! The proactor dispatcher.
//!
//! A [`ProactorDispatcher`] owns three pools, one per [`PoolRole`], and builds one
//! [`Sink`] per pipeline activation. Each stage of a pipeline is bound to a route
//! by [`ProactorDispatcher::on_stage`]; the sink's event-loop consumers then run
//! light stages inline and offload the rest, never exceeding
//! [`DispatchConfig::offload_concurrency`] outstanding tasks per offload pool.
//!
//! ```
//! use proactor_lib::config::DispatchConfig;
//! use proactor_lib::dispatcher::{Pipeline, ProactorDispatcher};
//! use proactor_lib::event::{Event, Payload};
//! use proactor_lib::stage::Stage;
//! use std::sync::mpsc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dispatcher = ProactorDispatcher::new("orders", DispatchConfig::default().with_pool_threads(1, 1))?;
//! dispatcher.start()?;
//!
//! let (tx, rx) = mpsc::channel();
//! let pipeline = Pipeline::new()
//!     .then(Stage::cpu_intensive("checksum", Ok))
//!     .on_complete(move |outcome| tx.send(outcome).unwrap());
//! let sink = dispatcher.create_sink("orders", pipeline)?;
//!
//! sink.submit(Event::new(Payload::bytes(b"order".to_vec())))?;
//! let outcome = rx.recv()?;
//! assert_eq!(outcome.result?.execution_context(), Some("orders.CPU_INTENSIVE"));
//!
//! dispatcher.stop()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::bounded;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use proactor_pool::{
    ConcurrencyLimiter, PoolRole, PoolSpec, ThreadPoolFactory, WorkerPool, WorkerPoolFactory,
};

use crate::classifier::{RoutedStage, StageClassifier, StreamingHeuristic};
use crate::config::DispatchConfig;
use crate::errors::{DispatchError, Result};
use crate::event::{CorrelationId, Event};
use crate::event_loop::{CompletionCallback, Consumer, PipelineRuntime};
use crate::instrumentation::{DiagnosticContext, ThreadInstrumentation};
use crate::metrics::{DispatchCounters, DispatchMetrics};
use crate::progress::ProgressTracker;
use crate::retry::RetryBackoff;
use crate::shutdown::{ShutdownCoordinator, ShutdownState};
use crate::sink::Sink;
use crate::stage::Stage;

/// Terminal outcome of one event.
#[derive(Debug)]
pub struct EventOutcome {
    /// Correlation id of the event.
    pub id: CorrelationId,
    /// The final event, or the error that ended it.
    pub result: std::result::Result<Event, DispatchError>,
}

impl EventOutcome {
    /// True if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Ordered stages plus what to do with each finished event.
pub struct Pipeline {
    stages: Vec<Stage>,
    transactional: bool,
    on_complete: Arc<CompletionCallback>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Empty pipeline that discards outcomes.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new(), transactional: false, on_complete: Arc::new(|_| {}) }
    }

    /// Append a stage.
    #[must_use]
    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Mark the pipeline as running inside a transaction.
    #[must_use]
    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Receive every event's terminal outcome. Called on an event-loop thread.
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(EventOutcome) + Send + Sync + 'static,
    {
        self.on_complete = Arc::new(callback);
        self
    }

    /// Stages in order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .field("transactional", &self.transactional)
            .finish_non_exhaustive()
    }
}

/// The started pools and their offload limiters, indexed by [`PoolRole::index`].
pub(crate) struct PoolSet {
    pools: [Arc<dyn WorkerPool>; 3],
    limiters: [Arc<ConcurrencyLimiter>; 3],
}

impl PoolSet {
    pub(crate) fn get(&self, role: PoolRole) -> &Arc<dyn WorkerPool> {
        &self.pools[role.index()]
    }

    pub(crate) fn limiter(&self, role: PoolRole) -> &Arc<ConcurrencyLimiter> {
        &self.limiters[role.index()]
    }

    fn stop_all(&self) {
        for pool in &self.pools {
            pool.stop();
        }
    }
}

/// Routes pipeline stages onto event-loop, CPU-intensive and blocking pools.
pub struct ProactorDispatcher {
    name: String,
    config: DispatchConfig,
    classifier: StageClassifier,
    heuristic: StreamingHeuristic,
    factory: Arc<dyn WorkerPoolFactory>,
    limiters: [Arc<ConcurrencyLimiter>; 3],
    diagnostics: DiagnosticContext,
    pools: RwLock<Option<Arc<PoolSet>>>,
    sinks: Mutex<Vec<Sink>>,
}

impl ProactorDispatcher {
    /// Dispatcher using [`ThreadPoolFactory`].
    ///
    /// # Errors
    /// Returns [`DispatchError::InvalidParameter`] if `config` does not validate
    pub fn new(name: impl Into<String>, config: DispatchConfig) -> Result<Self> {
        Self::with_factory(name, config, Arc::new(ThreadPoolFactory))
    }

    /// Dispatcher whose pools come from `factory`.
    ///
    /// # Errors
    /// Returns [`DispatchError::InvalidParameter`] if `config` does not validate
    pub fn with_factory(
        name: impl Into<String>,
        config: DispatchConfig,
        factory: Arc<dyn WorkerPoolFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let bound = config.offload_concurrency();
        Ok(Self {
            name: name.into(),
            classifier: StageClassifier::new(config.mode),
            heuristic: StreamingHeuristic::new(config.streaming_threshold_bytes),
            limiters: PoolRole::ALL.map(|_| Arc::new(ConcurrencyLimiter::new(bound))),
            config,
            factory,
            diagnostics: DiagnosticContext::new(),
            pools: RwLock::new(None),
            sinks: Mutex::new(Vec::new()),
        })
    }

    /// Dispatcher name; prefixes every pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Name of the pool playing `role`.
    #[must_use]
    pub fn pool_name(&self, role: PoolRole) -> String {
        role.pool_name(&self.name)
    }

    /// Offload limiter for `role`.
    #[must_use]
    pub fn limiter(&self, role: PoolRole) -> &Arc<ConcurrencyLimiter> {
        &self.limiters[role.index()]
    }

    /// Hand-off records; empty unless thread instrumentation is enabled.
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticContext {
        &self.diagnostics
    }

    /// True between [`ProactorDispatcher::start`] and [`ProactorDispatcher::stop`].
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.pools.read().is_some()
    }

    /// Create the pools. Calling it again while started does nothing.
    ///
    /// If a pool cannot be created, the ones already created are stopped again.
    ///
    /// # Errors
    /// Returns [`DispatchError::PoolStart`] naming the pool that failed
    pub fn start(&self) -> Result<()> {
        let mut slot = self.pools.write();
        if slot.is_some() {
            return Ok(());
        }
        let consumers = self.config.effective_consumer_count();
        let queue = self.config.pool_queue_capacity;
        let event_loop =
            self.create_pool(&PoolSpec::new(PoolRole::EventLoop, &self.name, consumers, consumers), &[])?;
        let cpu_intensive = self.create_pool(
            &PoolSpec::new(PoolRole::CpuIntensive, &self.name, self.config.cpu_intensive_threads, queue),
            &[&event_loop],
        )?;
        let blocking = self.create_pool(
            &PoolSpec::new(PoolRole::Blocking, &self.name, self.config.blocking_threads, queue),
            &[&event_loop, &cpu_intensive],
        )?;

        *slot = Some(Arc::new(PoolSet {
            pools: [event_loop, cpu_intensive, blocking],
            limiters: self.limiters.clone(),
        }));
        info!(
            "Dispatcher '{}' started: mode {:?}, {} consumer(s), {} concurrent offload(s) per pool",
            self.name,
            self.config.mode,
            consumers,
            self.config.offload_concurrency()
        );
        Ok(())
    }

    fn create_pool(&self, spec: &PoolSpec, started: &[&Arc<dyn WorkerPool>]) -> Result<Arc<dyn WorkerPool>> {
        match self.factory.create(spec) {
            Ok(pool) => {
                debug!("Created pool '{}' with {} thread(s)", spec.name, spec.threads);
                Ok(pool)
            }
            Err(source) => {
                for pool in started {
                    pool.stop();
                }
                Err(DispatchError::PoolStart { pool: spec.name.clone(), source })
            }
        }
    }

    /// Drain every sink, then stop the pools.
    ///
    /// Idempotent, and safe before [`ProactorDispatcher::start`] or after a failed
    /// start. A drain that times out is logged and the pools are stopped anyway.
    ///
    /// # Errors
    /// Returns [`DispatchError::InterruptedShutdown`] if a drain wait is
    /// interrupted; the pools are left running so the stop can be retried.
    pub fn stop(&self) -> Result<()> {
        let sinks: Vec<Sink> = self.sinks.lock().clone();
        for sink in &sinks {
            sink.close()?;
        }
        if let Some(pools) = self.pools.write().take() {
            pools.stop_all();
            info!("Dispatcher '{}' stopped", self.name);
        }
        Ok(())
    }

    /// Bind `stage` to its route under this dispatcher's mode.
    #[must_use]
    pub fn on_stage(&self, stage: Stage) -> RoutedStage {
        let route = self.classifier.classify(stage.processing_type());
        RoutedStage::new(stage, route, self.heuristic)
    }

    /// Start consumers for `pipeline` and return the sink feeding them.
    ///
    /// # Errors
    /// - [`DispatchError::UnsupportedContext`] for a transactional pipeline
    /// - [`DispatchError::NotStarted`] before [`ProactorDispatcher::start`]
    /// - [`DispatchError::PoolSaturated`] while another sink is running or its
    ///   consumers have not yet exited
    pub fn create_sink(&self, pipeline_id: &str, pipeline: Pipeline) -> Result<Sink> {
        if pipeline.transactional {
            return Err(DispatchError::UnsupportedContext { pipeline: pipeline_id.to_string() });
        }
        let pools = self
            .pools
            .read()
            .clone()
            .ok_or_else(|| DispatchError::NotStarted { dispatcher: self.name.clone() })?;
        let event_loop = Arc::clone(pools.get(PoolRole::EventLoop));

        let mut sinks = self.sinks.lock();
        // A sink whose drain timed out may still occupy event-loop threads.
        if sinks
            .iter()
            .any(|sink| sink.state() == ShutdownState::Running || sink.running_consumers() > 0)
        {
            return Err(DispatchError::PoolSaturated { pool: event_loop.name().to_string() });
        }

        let consumers = self.config.effective_consumer_count();
        let (sender, buffer) = bounded(self.config.buffer_size);
        let coordinator = ShutdownCoordinator::new(pipeline_id, consumers, self.config.shutdown_timeout);
        let latch = Arc::clone(coordinator.latch());
        let counters = Arc::new(DispatchCounters::default());
        let progress = Arc::new(
            ProgressTracker::new(format!("Pipeline '{pipeline_id}' completed events"))
                .with_interval(self.config.progress_interval),
        );
        let runtime = Arc::new(PipelineRuntime {
            pipeline: pipeline_id.to_string(),
            stages: pipeline.stages.into_iter().map(|stage| self.on_stage(stage)).collect(),
            on_complete: pipeline.on_complete,
            pools,
            backoff: RetryBackoff::new(self.config.retry_interval),
            instrumentation: ThreadInstrumentation::new(
                self.config.thread_instrumentation,
                self.diagnostics.clone(),
            ),
            counters: Arc::clone(&counters),
            progress: Arc::clone(&progress),
        });
        let sink = Sink::new(
            pipeline_id.to_string(),
            self.config.overflow_policy,
            sender,
            buffer.clone(),
            coordinator,
            counters,
            progress,
        );

        for index in 0..consumers {
            let consumer = Consumer::new(index, Arc::clone(&runtime), buffer.clone(), Arc::clone(&latch));
            if let Err(err) = event_loop.try_execute(consumer.into_task()) {
                let error = if err.is_saturation() {
                    DispatchError::PoolSaturated { pool: err.pool().to_string() }
                } else {
                    DispatchError::NotStarted { dispatcher: self.name.clone() }
                };
                drop(err);
                // Consumers already running see the closed buffer and exit.
                let _ = sink.close();
                return Err(error);
            }
        }
        debug!("Pipeline '{pipeline_id}' has {consumers} consumer(s) on '{}'", event_loop.name());
        sinks.push(sink.clone());
        Ok(sink)
    }

    /// Counters of the most recent sink created for `pipeline`.
    #[must_use]
    pub fn metrics(&self, pipeline: &str) -> Option<DispatchMetrics> {
        let sinks = self.sinks.lock();
        let sink = sinks.iter().rev().find(|sink| sink.pipeline() == pipeline)?;
        Some(self.with_peaks(sink.counters()))
    }

    /// Counters of every sink created so far, oldest first.
    #[must_use]
    pub fn all_metrics(&self) -> Vec<DispatchMetrics> {
        self.sinks.lock().iter().map(|sink| self.with_peaks(sink.counters())).collect()
    }

    fn with_peaks(&self, mut metrics: DispatchMetrics) -> DispatchMetrics {
        metrics.peak_cpu_intensive_in_flight = self.limiter(PoolRole::CpuIntensive).peak() as u64;
        metrics.peak_blocking_in_flight = self.limiter(PoolRole::Blocking).peak() as u64;
        metrics
    }
}

impl fmt::Debug for ProactorDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProactorDispatcher")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
