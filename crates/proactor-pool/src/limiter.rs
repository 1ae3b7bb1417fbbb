//! Lock-free concurrency gate for offloaded work.
//!
//! A [`ConcurrencyLimiter`] bounds how many tasks may be outstanding on a pool at
//! once, independently of how many threads the pool has. Permits are acquired
//! without blocking; a caller that cannot get one is expected to park its work and
//! try again later rather than wait.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts outstanding permits against a fixed limit.
pub struct ConcurrencyLimiter {
    limit: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// Create a limiter allowing `limit` concurrent permits (at least one).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.max(1), in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) }
    }

    /// The configured limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of permits held at once since creation.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// True if no permit is available right now.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.in_flight() >= self.limit
    }

    /// Take a permit if one is available. The permit is returned on drop.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.limit {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(current + 1, Ordering::Relaxed);
                    return Some(Permit { limiter: Arc::clone(self) });
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("limit", &self.limit)
            .field("in_flight", &self.in_flight())
            .field("peak", &self.peak())
            .finish()
    }
}

/// A held slot of a [`ConcurrencyLimiter`]; released when dropped.
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    limiter: Arc<ConcurrencyLimiter>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").field("limit", &self.limiter.limit).finish()
    }
}
