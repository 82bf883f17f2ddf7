// src/exec/backend.rs

//! Pluggable worker backend abstraction.
//!
//! The scheduler shell hands each dispatched task to a `WorkerBackend` and
//! supervises the returned future. Production code uses
//! [`PoolBackend`](crate::exec::PoolBackend); tests can script outcomes
//! without running analyses.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::TaskError;
use crate::scheduler::DispatchedTask;

/// What a worker reports for one task.
pub type TaskResult = Result<Arc<Value>, TaskError>;

/// Future running one task to completion.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send + 'static>>;

/// Trait abstracting how dispatched tasks are executed.
///
/// The returned future is spawned onto the runtime and may be aborted on
/// timeout. It must not borrow from the backend.
pub trait WorkerBackend: Send + Sync + 'static {
    fn execute(&self, task: DispatchedTask) -> TaskFuture;
}

impl<B: WorkerBackend + ?Sized> WorkerBackend for Arc<B> {
    fn execute(&self, task: DispatchedTask) -> TaskFuture {
        (**self).execute(task)
    }
}
