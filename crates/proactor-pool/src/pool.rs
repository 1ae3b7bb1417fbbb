//! Bounded worker pools with reject-on-saturation submission.
//!
//! A pool never queues unboundedly: [`WorkerPool::try_execute`] either hands the task
//! to the pool or returns it inside a [`SubmitError`], so the caller decides whether
//! to retry, park, or give up.
//!
//! # Example
//!
//! ```
//! use proactor_pool::{ThreadPool, WorkerPool};
//! use std::sync::mpsc;
//!
//! let pool = ThreadPool::new("demo.CPU_INTENSIVE", 2, 4).unwrap();
//! let (tx, rx) = mpsc::channel();
//! pool.try_execute(Box::new(move || tx.send(42).unwrap())).unwrap();
//! assert_eq!(rx.recv().unwrap(), 42);
//! pool.stop();
//! ```

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, error};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// A unit of work submitted to a pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The execution role a pool plays for a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolRole {
    /// Small pool hosting the event-loop consumers; sequences stage execution.
    EventLoop,
    /// Pool for CPU-bound stages.
    CpuIntensive,
    /// Pool for blocking and IO-bound stages.
    Blocking,
}

impl PoolRole {
    /// All roles, in start order.
    pub const ALL: [PoolRole; 3] = [PoolRole::EventLoop, PoolRole::CpuIntensive, PoolRole::Blocking];

    /// Upper-case role tag used in pool names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PoolRole::EventLoop => "EVENT_LOOP",
            PoolRole::CpuIntensive => "CPU_INTENSIVE",
            PoolRole::Blocking => "BLOCKING",
        }
    }

    /// Dense index, for per-role arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            PoolRole::EventLoop => 0,
            PoolRole::CpuIntensive => 1,
            PoolRole::Blocking => 2,
        }
    }

    /// Name of the pool for this role under the given prefix, e.g. `flow.BLOCKING`.
    #[must_use]
    pub fn pool_name(self, prefix: &str) -> String {
        format!("{prefix}.{}", self.as_str())
    }
}

impl fmt::Display for PoolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pool refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitErrorKind {
    /// Every slot is busy; the condition is transient.
    Saturated,
    /// The pool has been stopped and accepts nothing further.
    Stopped,
}

/// A rejected submission. Carries the task back so it can be resubmitted unchanged.
pub struct SubmitError {
    kind: SubmitErrorKind,
    pool: String,
    task: Task,
}

impl SubmitError {
    /// Create a rejection for `task` on `pool`.
    #[must_use]
    pub fn new(kind: SubmitErrorKind, pool: impl Into<String>, task: Task) -> Self {
        Self { kind, pool: pool.into(), task }
    }

    /// The rejection kind.
    #[must_use]
    pub fn kind(&self) -> SubmitErrorKind {
        self.kind
    }

    /// Name of the pool that rejected the task.
    #[must_use]
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// True when the pool rejected the task because it is at capacity.
    #[must_use]
    pub fn is_saturation(&self) -> bool {
        self.kind == SubmitErrorKind::Saturated
    }

    /// Recover the task that was not executed.
    #[must_use]
    pub fn into_task(self) -> Task {
        self.task
    }
}

impl fmt::Debug for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitError").field("kind", &self.kind).field("pool", &self.pool).finish()
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SubmitErrorKind::Saturated => write!(f, "pool '{}' is saturated", self.pool),
            SubmitErrorKind::Stopped => write!(f, "pool '{}' is stopped", self.pool),
        }
    }
}

impl std::error::Error for SubmitError {}

/// A named, bounded execution resource.
///
/// Implementations must never grow an unbounded queue: when they cannot accept a
/// task they return it in a [`SubmitError`]. `stop` must be idempotent.
pub trait WorkerPool: Send + Sync {
    /// Pool name, used in logs and in the event execution-context slot.
    fn name(&self) -> &str;

    /// Hand `task` to the pool, or return it with the reason it was refused.
    fn try_execute(&self, task: Task) -> Result<(), SubmitError>;

    /// Refuse further submissions. Safe to call more than once.
    fn stop(&self);

    /// True once `stop` has been called.
    fn is_stopped(&self) -> bool;
}

/// Thread-backed [`WorkerPool`] with a bounded hand-off queue.
///
/// With `queue_capacity == 0` a submission only succeeds when a worker is idle and
/// waiting, so the pool's capacity is exactly its thread count.
pub struct ThreadPool {
    name: String,
    threads: usize,
    sender: RwLock<Option<Sender<Task>>>,
    stopped: AtomicBool,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    completed: Arc<AtomicU64>,
    rejected: AtomicU64,
}

impl ThreadPool {
    /// Spawn a pool of `threads` workers (at least one) named `<name>.<NN>`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a worker thread cannot be spawned.
    pub fn new(name: impl Into<String>, threads: usize, queue_capacity: usize) -> io::Result<Self> {
        let name = name.into();
        let threads = threads.max(1);
        let (sender, receiver) = crossbeam_channel::bounded::<Task>(queue_capacity);
        let completed = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let completed = Arc::clone(&completed);
            let pool_name = name.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}.{index:02}"))
                .spawn(move || worker_loop(&pool_name, &receiver, &completed))?;
            handles.push(handle);
        }
        debug!("Started pool {name} with {threads} threads (queue capacity {queue_capacity})");

        Ok(Self {
            name,
            threads,
            sender: RwLock::new(Some(sender)),
            stopped: AtomicBool::new(false),
            handles: Mutex::new(handles),
            completed,
            rejected: AtomicU64::new(0),
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Tasks run to completion so far.
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Submissions refused because the pool was saturated.
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Wait up to `timeout` for every worker to exit after [`WorkerPool::stop`].
    ///
    /// Returns true if all workers exited in time.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut handles = self.handles.lock();
                if handles.iter().all(thread::JoinHandle::is_finished) {
                    for handle in handles.drain(..) {
                        let _ = handle.join();
                    }
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl WorkerPool for ThreadPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_execute(&self, task: Task) -> Result<(), SubmitError> {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return Err(SubmitError::new(SubmitErrorKind::Stopped, &self.name, task));
        };
        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(SubmitError::new(SubmitErrorKind::Saturated, &self.name, task))
            }
            Err(TrySendError::Disconnected(task)) => {
                Err(SubmitError::new(SubmitErrorKind::Stopped, &self.name, task))
            }
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender lets workers drain accepted tasks and then exit.
        self.sender.write().take();
        debug!("Stopped pool {}", self.name);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("threads", &self.threads)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

fn worker_loop(pool: &str, receiver: &Receiver<Task>, completed: &AtomicU64) {
    while let Ok(task) = receiver.recv() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
            error!("Task on pool {pool} panicked: {}", panic_message(panic.as_ref()));
        }
        completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Extract a readable message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
