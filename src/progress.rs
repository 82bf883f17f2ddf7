// src/progress.rs

//! Progress events and the sinks that render them.

use std::time::SystemTime;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::graph::NodeStatus;
use crate::task::TaskId;

/// One node status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub node: TaskId,
    pub label: String,
    pub status: NodeStatus,
    pub timestamp: SystemTime,
}

impl ProgressEvent {
    pub fn new(node: TaskId, label: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            node,
            label: label.into(),
            status,
            timestamp: SystemTime::now(),
        }
    }
}

/// Receives every status change of a run, from the orchestrating task.
///
/// Implementations must return quickly; rendering that blocks holds up
/// dispatch.
pub trait ProgressReporter: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);

    /// Called once before the first event with the number of nodes.
    fn on_run_started(&self, _total: usize) {}

    fn on_run_finished(&self) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Writes events to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn on_event(&self, event: &ProgressEvent) {
        let id = event.node.short();
        match event.status {
            NodeStatus::Running => info!(task = %event.label, %id, "started"),
            NodeStatus::Done => info!(task = %event.label, %id, "finished"),
            NodeStatus::Failed => warn!(task = %event.label, %id, "failed"),
            NodeStatus::Skipped => warn!(task = %event.label, %id, "skipped"),
            NodeStatus::Pending | NodeStatus::Ready => {
                debug!(task = %event.label, %id, status = ?event.status, "status changed")
            }
        }
    }

    fn on_run_started(&self, total: usize) {
        info!(total, "run started");
    }
}

/// Terminal progress bar counting finished nodes.
#[derive(Clone)]
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    /// Bar drawn on stderr.
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), target);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        Self { bar }
    }

    /// Finished nodes so far.
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }
}

impl Default for BarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for BarReporter {
    fn on_event(&self, event: &ProgressEvent) {
        match event.status {
            NodeStatus::Running => self.bar.set_message(event.label.clone()),
            status if status.is_terminal() => self.bar.inc(1),
            _ => {}
        }
    }

    fn on_run_started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn on_run_finished(&self) {
        self.bar.finish_with_message("done");
    }
}
