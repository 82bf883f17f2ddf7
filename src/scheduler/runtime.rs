// src/scheduler/runtime.rs

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{AnadagError, Result};
use crate::exec::{WorkerBackend, spawn_supervised};
use crate::graph::{NodeStatus, RelationGraph};
use crate::progress::{NoopReporter, ProgressEvent, ProgressReporter};
use crate::resource::{ResourceMonitor, SystemMonitor};

use super::core::SchedulerCore;
use super::report::RunReport;
use super::{CancelHandle, CoreCommand, SchedulerEvent, SchedulerSettings};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Runs a [`RelationGraph`] on a bounded pool of workers.
///
/// This is the async IO shell around [`SchedulerCore`], which holds all
/// dispatch semantics. The shell reads memory before every core step,
/// hands dispatched tasks to the backend under supervision, forwards status
/// changes to the progress reporter, and waits for the next worker event
/// (or for the poll interval while memory holds dispatch back).
pub struct ParallelScheduler<B: WorkerBackend> {
    backend: B,
    settings: SchedulerSettings,
    monitor: Arc<dyn ResourceMonitor>,
    reporter: Arc<dyn ProgressReporter>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    event_rx: mpsc::Receiver<SchedulerEvent>,
}

impl<B: WorkerBackend> fmt::Debug for ParallelScheduler<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelScheduler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<B: WorkerBackend> ParallelScheduler<B> {
    /// Scheduler reading memory from the OS and reporting nothing.
    pub fn new(backend: B, settings: SchedulerSettings) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            settings,
            monitor: Arc::new(SystemMonitor::new()),
            reporter: Arc::new(NoopReporter),
            event_tx,
            event_rx,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Handle for cancelling the run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.event_tx.clone())
    }

    /// Run `graph` to completion.
    ///
    /// Task failures are contained in the report. Errors returned from here
    /// are logic errors (an invalid status transition, a graph that already
    /// ran).
    pub async fn run(mut self, graph: RelationGraph) -> Result<RunReport> {
        let total = graph.len();
        let mut core = SchedulerCore::new(graph, &self.settings)?;

        let start = self.monitor.snapshot();
        info!(
            tasks = total,
            max_workers = self.settings.max_workers,
            memory_ceiling = self.settings.memory_ceiling_bytes,
            available = start.available_memory_bytes,
            in_use = start.used_memory_bytes,
            "scheduler run started"
        );
        self.reporter.on_run_started(total);

        let mut event = SchedulerEvent::Started;
        let mut under_pressure = false;

        loop {
            debug!(?event, "scheduler received event");

            let snapshot = self.monitor.snapshot();
            let step = core.step(event, &snapshot)?;

            let stalled = step.stalled;
            let mut pressure_now = false;
            for command in step.commands {
                match command {
                    CoreCommand::Dispatch(tasks) => {
                        for task in tasks {
                            spawn_supervised(&self.backend, task, self.event_tx.clone());
                        }
                    }
                    CoreCommand::StatusChanged(t) => {
                        self.reporter
                            .on_event(&ProgressEvent::new(t.id, t.label, t.status));
                    }
                    CoreCommand::MemoryPressure(pressure) => {
                        pressure_now = true;
                        if under_pressure {
                            debug!(%pressure, running = core.running(), "still under memory pressure");
                        } else {
                            warn!(%pressure, running = core.running(), "dispatch suspended");
                        }
                    }
                }
            }
            if under_pressure && !pressure_now {
                info!("memory pressure relieved; dispatch resumed");
            }
            under_pressure = pressure_now;

            if !step.keep_running {
                break;
            }

            let received = if stalled {
                tokio::select! {
                    received = self.event_rx.recv() => received,
                    _ = tokio::time::sleep(self.settings.poll_interval) => Some(SchedulerEvent::Tick),
                }
            } else {
                self.event_rx.recv().await
            };
            event = received
                .ok_or_else(|| AnadagError::Other(anyhow!("scheduler event channel closed")))?;
        }

        let end = self.monitor.snapshot();
        let report = core.into_report();
        info!(
            done = report.count(NodeStatus::Done),
            failed = report.count(NodeStatus::Failed),
            skipped = report.count(NodeStatus::Skipped),
            available = end.available_memory_bytes,
            in_use = end.used_memory_bytes,
            "scheduler run finished"
        );
        self.reporter.on_run_finished();

        Ok(report)
    }
}
