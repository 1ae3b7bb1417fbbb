//! Supplies one pool per role when a dispatcher starts.

use std::io;
use std::sync::Arc;

use crate::pool::{PoolRole, ThreadPool, WorkerPool};

/// What a factory is asked to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    /// Role the pool plays.
    pub role: PoolRole,
    /// Pool name, `<prefix>.<ROLE>`.
    pub name: String,
    /// Worker thread count.
    pub threads: usize,
    /// Bounded queue capacity; 0 means direct hand-off to an idle worker.
    pub queue_capacity: usize,
}

impl PoolSpec {
    /// Build a spec for `role` under `prefix`.
    #[must_use]
    pub fn new(role: PoolRole, prefix: &str, threads: usize, queue_capacity: usize) -> Self {
        Self { role, name: role.pool_name(prefix), threads, queue_capacity }
    }
}

/// Creates the pools a dispatcher runs on.
///
/// Custom factories let embedders share pools between dispatchers or inject
/// instrumented pools in tests.
pub trait WorkerPoolFactory: Send + Sync {
    /// Build the pool described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool's resources cannot be allocated.
    fn create(&self, spec: &PoolSpec) -> io::Result<Arc<dyn WorkerPool>>;
}

/// Factory producing a fresh [`ThreadPool`] per spec.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPoolFactory;

impl WorkerPoolFactory for ThreadPoolFactory {
    fn create(&self, spec: &PoolSpec) -> io::Result<Arc<dyn WorkerPool>> {
        let pool = ThreadPool::new(spec.name.clone(), spec.threads, spec.queue_capacity)?;
        Ok(Arc::new(pool))
    }
}
