// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`backend`] defines the `WorkerBackend` seam the scheduler dispatches
//!   through.
//! - [`worker`] is the production backend: cache, dataset loading and
//!   analysis compute on the blocking pool.
//! - [`task_runner`] supervises one task: timeout, panic isolation, and
//!   reporting the outcome back to the scheduler.

pub mod backend;
pub mod task_runner;
pub mod worker;

pub use backend::{TaskFuture, TaskResult, WorkerBackend};
pub use task_runner::spawn_supervised;
pub use worker::{PoolBackend, materialize};
