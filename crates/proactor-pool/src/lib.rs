#![deny(unsafe_code)]

//! Named, bounded worker pools for the proactor dispatcher.
//!
//! This crate provides the execution resources the dispatcher routes work onto:
//! - [`WorkerPool`] trait with a reject-on-saturation submission contract
//! - [`ThreadPool`], the default thread-backed implementation
//! - [`ConcurrencyLimiter`] and its RAII [`Permit`] for bounding in-flight offloads
//! - [`WorkerPoolFactory`] for supplying one pool per [`PoolRole`]

pub mod factory;
pub mod limiter;
pub mod pool;

pub use factory::{PoolSpec, ThreadPoolFactory, WorkerPoolFactory};
pub use limiter::{ConcurrencyLimiter, Permit};
pub use pool::{
    PoolRole, SubmitError, SubmitErrorKind, Task, ThreadPool, WorkerPool, panic_message,
};
