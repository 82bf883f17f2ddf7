// src/errors.rs

//! Crate-wide error types.
//!
//! Graph-construction errors ([`CycleError`], [`InvalidTransitionError`]) are
//! fatal to the call that raised them. Task-level errors ([`TaskError`]) are
//! contained at the node boundary and reported in the run outcome.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::graph::NodeStatus;
use crate::task::TaskId;

/// Error shared between every caller blocked on the same computation.
pub type SharedError = Arc<anyhow::Error>;

#[derive(Error, Debug)]
pub enum AnadagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransitionError),

    #[error("Task not found in graph: {0}")]
    UnknownTask(TaskId),

    #[error("Task {task} depends on {dependency}, which is not in the graph")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Adding `consumer -> producer` would close a cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cycle detected: {consumer} cannot depend on {producer}, which already depends on it")]
pub struct CycleError {
    pub consumer: TaskId,
    pub producer: TaskId,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid status transition for {task}: {from:?} -> {to:?}")]
pub struct InvalidTransitionError {
    pub task: TaskId,
    pub from: NodeStatus,
    pub to: NodeStatus,
}

/// Anything raised while a task was executing, including panics, unknown
/// analyses and dataset load failures.
#[derive(Error, Debug, Clone)]
#[error("task {task} failed: {detail:#}")]
pub struct TaskComputeError {
    pub task: TaskId,
    pub detail: SharedError,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("task {task} exceeded its wall-clock budget of {limit:?}")]
pub struct TimeoutError {
    pub task: TaskId,
    pub limit: Duration,
}

/// Memory headroom fell below the safety margin. Reported, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "memory pressure: {available} bytes available, {in_use} in use, ceiling {ceiling}, margin {margin}"
)]
pub struct ResourceExhaustionError {
    pub available: u64,
    pub in_use: u64,
    pub ceiling: u64,
    pub margin: u64,
}

/// Error recorded as the outcome of a Failed node.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error(transparent)]
    Compute(#[from] TaskComputeError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl TaskError {
    pub fn compute(task: TaskId, err: impl Into<anyhow::Error>) -> Self {
        TaskError::Compute(TaskComputeError {
            task,
            detail: Arc::new(err.into()),
        })
    }

    /// Wrap an error already shared with other callers (e.g. by the result
    /// cache's compute barrier).
    pub fn shared(task: TaskId, detail: SharedError) -> Self {
        TaskError::Compute(TaskComputeError { task, detail })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout(_))
    }

    pub fn task(&self) -> &TaskId {
        match self {
            TaskError::Compute(e) => &e.task,
            TaskError::Timeout(e) => &e.task,
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AnadagError>;
