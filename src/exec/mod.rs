// src/exec/mod.rs

//! Task execution layer.
//!
//! This module is responsible for actually running task bodies on worker
//! threads and reporting back to the coordinator via `RuntimeEvent`s.
//!
//! - [`backend`] provides the `ExecutorBackend` trait the runtime talks to;
//!   tests can replace the pool with a fake implementation.
//! - [`pool`] owns the resizable set of workers.
//! - [`task_runner`] runs a single body and turns its result into a
//!   [`TaskOutcome`](crate::engine::TaskOutcome).

pub mod backend;
pub mod pool;
pub mod task_runner;

pub use backend::ExecutorBackend;
pub use pool::{JobHandle, WorkerPool};
pub use task_runner::run_job;
