// src/scheduler/mod.rs

//! Parallel execution of a [`RelationGraph`](crate::graph::RelationGraph).
//!
//! The pure dispatch state machine lives in [`core`]: it consumes
//! [`SchedulerEvent`]s plus a memory reading and returns commands. The
//! async shell in [`runtime`] owns the event channel, timers and the worker
//! backend.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::model::SchedulerSection;
use crate::exec::TaskResult;
use crate::resource::Backpressure;
use crate::resource::backpressure::DEFAULT_SAFETY_MARGIN;
use crate::task::TaskId;

pub mod core;
pub mod dispatch;
pub mod report;
pub mod runtime;

pub use self::core::{CoreCommand, CoreStep, SchedulerCore};
pub use dispatch::{DispatchedTask, JobInput};
pub use report::{NodeOutcome, RunReport, Transition};
pub use runtime::ParallelScheduler;

/// Events flowing into the scheduler core.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// First step of a run.
    Started,
    /// Periodic re-check while dispatch is held back by memory.
    Tick,
    /// A worker returned, failed, panicked or timed out.
    WorkerFinished { id: TaskId, result: TaskResult },
    /// Stop dispatching; let in-flight work finish.
    CancelRequested,
}

/// Scheduler limits and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub max_workers: usize,
    /// `u64::MAX` means no ceiling beyond system memory.
    pub memory_ceiling_bytes: u64,
    pub safety_margin: f64,
    /// How often memory is re-read while dispatch is stalled.
    pub poll_interval: Duration,
    /// Timeout for nodes without their own.
    pub default_timeout: Option<Duration>,
}

impl SchedulerSettings {
    pub fn new(max_workers: usize, memory_ceiling_bytes: u64) -> Self {
        Self {
            max_workers,
            memory_ceiling_bytes,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            poll_interval: Duration::from_millis(250),
            default_timeout: None,
        }
    }

    pub fn from_section(section: &SchedulerSection) -> Self {
        Self {
            max_workers: section.effective_max_workers(),
            memory_ceiling_bytes: section.effective_memory_ceiling(),
            safety_margin: section.safety_margin,
            poll_interval: section.poll_interval(),
            default_timeout: section.default_timeout(),
        }
    }

    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn backpressure(&self) -> Backpressure {
        Backpressure::new(self.memory_ceiling_bytes, self.safety_margin)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_section(&SchedulerSection::default())
    }
}

/// Requests cancellation of a running [`ParallelScheduler`].
///
/// Cancellation is cooperative: nothing new is dispatched, in-flight tasks
/// finish, and every node not yet started ends up Skipped.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: mpsc::Sender<SchedulerEvent>,
}

impl CancelHandle {
    pub(crate) fn new(tx: mpsc::Sender<SchedulerEvent>) -> Self {
        Self { tx }
    }

    pub async fn cancel(&self) {
        if self.tx.send(SchedulerEvent::CancelRequested).await.is_err() {
            debug!("scheduler already finished; cancel ignored");
        }
    }
}
