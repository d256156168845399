//! Workers
//!
//! A [`Worker`] runs one unit: load the slice, fit, validate, upsert into the
//! feature store, report. A [`WorkerPool`] feeds it from the job queue.

mod executor;
mod pool;

pub use executor::{validate_output, Worker};
pub use pool::{WorkerPool, WorkerPoolError, WorkerPoolStatus};
