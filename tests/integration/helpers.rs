//! Shared fixtures: scripted pools, gates and outcome collection.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use proactor_lib::config::DispatchConfig;
use proactor_lib::dispatcher::{EventOutcome, Pipeline};
use proactor_pool::{
    PoolRole, PoolSpec, SubmitError, SubmitErrorKind, Task, ThreadPoolFactory, WorkerPool,
    WorkerPoolFactory,
};

/// How long a test waits for something that should happen promptly.
pub const PATIENCE: Duration = Duration::from_secs(10);

/// Small pools with room to queue, so only scripted rejections occur.
pub fn test_config() -> DispatchConfig {
    DispatchConfig::default()
        .with_pool_threads(4, 4)
        .with_pool_queue_capacity(16)
        .with_shutdown_timeout(PATIENCE)
}

/// A real thread pool that records every submission attempt and can be told to
/// reject a number of them as saturated first.
pub struct ScriptedPool {
    inner: Arc<dyn WorkerPool>,
    reject_remaining: AtomicUsize,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedPool {
    /// Times of every submission attempt, accepted or not.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    /// Number of submission attempts.
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

impl WorkerPool for ScriptedPool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn try_execute(&self, task: Task) -> Result<(), SubmitError> {
        self.attempts.lock().push(Instant::now());
        if !self.inner.is_stopped()
            && self
                .reject_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(SubmitError::new(SubmitErrorKind::Saturated, self.name(), task));
        }
        self.inner.try_execute(task)
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}

/// Factory producing [`ScriptedPool`]s and remembering them by role.
#[derive(Default)]
pub struct ScriptedFactory {
    rejections: [usize; 3],
    fail_role: Option<PoolRole>,
    pools: Mutex<Vec<(PoolRole, Arc<ScriptedPool>)>>,
}

impl ScriptedFactory {
    /// Factory whose pool for `role` rejects its first `count` submissions.
    pub fn rejecting(role: PoolRole, count: usize) -> Self {
        let mut factory = Self::default();
        factory.rejections[role.index()] = count;
        factory
    }

    /// Factory that fails to create the pool for `role`.
    pub fn failing(role: PoolRole) -> Self {
        Self { fail_role: Some(role), ..Self::default() }
    }

    /// The most recently created pool for `role`.
    pub fn pool(&self, role: PoolRole) -> Arc<ScriptedPool> {
        self.pools
            .lock()
            .iter()
            .rev()
            .find(|(r, _)| *r == role)
            .map(|(_, pool)| Arc::clone(pool))
            .unwrap_or_else(|| panic!("no {role} pool created"))
    }

    /// True if a pool for `role` was created.
    pub fn created(&self, role: PoolRole) -> bool {
        self.pools.lock().iter().any(|(r, _)| *r == role)
    }
}

impl WorkerPoolFactory for ScriptedFactory {
    fn create(&self, spec: &PoolSpec) -> io::Result<Arc<dyn WorkerPool>> {
        if self.fail_role == Some(spec.role) {
            return Err(io::Error::other(format!("cannot create {}", spec.name)));
        }
        let pool = Arc::new(ScriptedPool {
            inner: ThreadPoolFactory.create(spec)?,
            reject_remaining: AtomicUsize::new(self.rejections[spec.role.index()]),
            attempts: Mutex::new(Vec::new()),
        });
        self.pools.lock().push((spec.role, Arc::clone(&pool)));
        Ok(pool)
    }
}

/// Receives outcomes from a pipeline.
pub struct Outcomes {
    rx: Receiver<EventOutcome>,
}

impl Outcomes {
    /// Wait for the next outcome.
    pub fn next(&self) -> EventOutcome {
        self.rx.recv_timeout(PATIENCE).expect("timed out waiting for an event outcome")
    }

    /// Wait for `n` outcomes.
    pub fn take(&self, n: usize) -> Vec<EventOutcome> {
        (0..n).map(|_| self.next()).collect()
    }

    /// Outcomes already delivered, without waiting.
    pub fn drain(&self) -> Vec<EventOutcome> {
        self.rx.try_iter().collect()
    }
}

/// An empty pipeline wired to an [`Outcomes`] collector.
pub fn collecting_pipeline() -> (Pipeline, Outcomes) {
    let (tx, rx) = unbounded();
    let pipeline = Pipeline::new().on_complete(move |outcome| {
        let _ = tx.send(outcome);
    });
    (pipeline, Outcomes { rx })
}

/// Holds stages back until opened; reports each stage that reaches it.
pub struct Gate {
    release: Mutex<Option<Sender<()>>>,
    released: Receiver<()>,
    entered_tx: Sender<()>,
    entered_rx: Receiver<()>,
}

impl Gate {
    /// A closed gate.
    pub fn new() -> Arc<Self> {
        let (release, released) = bounded(0);
        let (entered_tx, entered_rx) = unbounded();
        Arc::new(Self { release: Mutex::new(Some(release)), released, entered_tx, entered_rx })
    }

    /// Block the calling stage until the gate opens.
    pub fn pass(&self) {
        let _ = self.entered_tx.send(());
        // Returns once the release sender is dropped.
        let _ = self.released.recv();
    }

    /// Wait until `n` stages are waiting at (or have passed) the gate.
    pub fn await_entered(&self, n: usize) {
        for _ in 0..n {
            self.entered_rx.recv_timeout(PATIENCE).expect("stage never reached the gate");
        }
    }

    /// Let every current and future stage through.
    pub fn open(&self) {
        self.release.lock().take();
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        self.open();
    }
}
