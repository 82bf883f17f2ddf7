// src/scheduler/core.rs

//! Pure scheduler state machine.
//!
//! [`SchedulerCore`] owns the graph for the duration of a run and is the
//! only place node statuses change. Each [`step`](SchedulerCore::step)
//! applies one event, promotes newly ready nodes, and dispatches as many
//! Ready nodes as worker slots and memory allow. It performs no IO and
//! knows nothing about tokio, so it can be driven directly in tests.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dataset::DatasetHandle;
use crate::errors::{AnadagError, ResourceExhaustionError, Result, TaskError};
use crate::graph::{NodeStatus, RelationGraph, SkipReason};
use crate::resource::{Backpressure, ResourceSnapshot};
use crate::scheduler::dispatch::{DispatchedTask, JobInput, admit};
use crate::scheduler::report::{NodeOutcome, RunReport, Transition};
use crate::scheduler::{SchedulerEvent, SchedulerSettings};
use crate::task::{InputRef, TaskId};

/// Instructions for the async shell.
#[derive(Debug)]
pub enum CoreCommand {
    /// Start these tasks on workers.
    Dispatch(Vec<DispatchedTask>),
    /// Forward to the progress reporter.
    StatusChanged(Transition),
    /// Memory headroom is below the safety margin.
    MemoryPressure(ResourceExhaustionError),
}

/// Result of a single core step.
#[derive(Debug)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// False once every node is Done, Failed or Skipped.
    pub keep_running: bool,
    /// Ready nodes and free slots remain, but memory held dispatch back.
    /// The shell should re-check after its poll interval.
    pub stalled: bool,
}

impl CoreStep {
    pub fn dispatched(&self) -> impl Iterator<Item = &DispatchedTask> {
        self.commands.iter().flat_map(|c| match c {
            CoreCommand::Dispatch(tasks) => tasks.iter(),
            _ => Default::default(),
        })
    }

    pub fn memory_pressure(&self) -> Option<&ResourceExhaustionError> {
        self.commands.iter().find_map(|c| match c {
            CoreCommand::MemoryPressure(e) => Some(e),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub struct SchedulerCore {
    graph: RelationGraph,
    ranks: HashMap<TaskId, usize>,
    max_workers: usize,
    backpressure: Backpressure,
    default_timeout: Option<Duration>,
    /// Running nodes and their memory estimates.
    running: BTreeMap<TaskId, u64>,
    cancelled: bool,
    report: RunReport,
}

impl SchedulerCore {
    /// Take ownership of `graph` for one run.
    ///
    /// Nodes must be Pending, Ready or Skipped; a graph that has already
    /// been (partly) run is rejected.
    pub fn new(graph: RelationGraph, settings: &SchedulerSettings) -> Result<Self> {
        let ranks = graph.topological_ranks()?;
        let mut report = RunReport::default();

        for node in graph.nodes() {
            match node.status() {
                NodeStatus::Pending | NodeStatus::Ready => {}
                NodeStatus::Skipped => {
                    let reason = node.skip_reason().cloned().unwrap_or(SkipReason::Manual);
                    report
                        .outcomes
                        .insert(node.id().clone(), NodeOutcome::Skipped(reason));
                }
                status => {
                    return Err(AnadagError::ConfigError(format!(
                        "node '{}' is already {:?}; a graph can only be run once",
                        node.label(),
                        status
                    )));
                }
            }
        }

        let max_workers = if settings.max_workers == 0 {
            warn!("max_workers = 0; using a single worker");
            1
        } else {
            settings.max_workers
        };

        Ok(Self {
            graph,
            ranks,
            max_workers,
            backpressure: settings.backpressure(),
            default_timeout: settings.default_timeout,
            running: BTreeMap::new(),
            cancelled: false,
            report,
        })
    }

    pub fn graph(&self) -> &RelationGraph {
        &self.graph
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Ready nodes waiting for a slot or for memory.
    pub fn pending_dispatch(&self) -> usize {
        self.graph.count(NodeStatus::Ready)
    }

    /// Handle one event and return the commands for the shell.
    pub fn step(&mut self, event: SchedulerEvent, snapshot: &ResourceSnapshot) -> Result<CoreStep> {
        let mut commands = Vec::new();

        match event {
            SchedulerEvent::Started | SchedulerEvent::Tick => {}
            SchedulerEvent::WorkerFinished { id, result } => {
                self.on_finished(id, result, &mut commands)?;
            }
            SchedulerEvent::CancelRequested => self.on_cancel(&mut commands)?,
        }

        self.promote_ready(&mut commands)?;

        let stalled = if self.cancelled {
            false
        } else {
            self.dispatch(snapshot, &mut commands)?
        };

        Ok(CoreStep {
            commands,
            keep_running: !self.graph.is_terminal(),
            stalled,
        })
    }

    pub fn into_report(self) -> RunReport {
        self.report
    }

    fn record(&mut self, id: &TaskId, status: NodeStatus, commands: &mut Vec<CoreCommand>) {
        let label = self
            .graph
            .node(id)
            .map(|n| n.label().to_string())
            .unwrap_or_else(|| id.short().to_string());
        let transition = Transition {
            id: id.clone(),
            label,
            status,
        };
        self.report.transitions.push(transition.clone());
        commands.push(CoreCommand::StatusChanged(transition));
    }

    fn on_finished(
        &mut self,
        id: TaskId,
        result: std::result::Result<Arc<Value>, TaskError>,
        commands: &mut Vec<CoreCommand>,
    ) -> Result<()> {
        if self.running.remove(&id).is_none() {
            warn!(id = %id.short(), "completion for a task that is not running; ignoring");
            return Ok(());
        }

        match result {
            Ok(value) => {
                self.graph.mark(&id, NodeStatus::Done)?;
                self.report
                    .outcomes
                    .insert(id.clone(), NodeOutcome::Done(value));
                self.record(&id, NodeStatus::Done, commands);
            }
            Err(err) => {
                warn!(id = %id.short(), error = %err, timeout = err.is_timeout(), "task failed");
                let skipped = self.graph.mark(&id, NodeStatus::Failed)?;
                self.report
                    .outcomes
                    .insert(id.clone(), NodeOutcome::Failed(err));
                self.record(&id, NodeStatus::Failed, commands);
                self.record_skipped(&skipped, SkipReason::Upstream(id.clone()), commands);
            }
        }
        Ok(())
    }

    fn record_skipped(
        &mut self,
        skipped: &[TaskId],
        fallback: SkipReason,
        commands: &mut Vec<CoreCommand>,
    ) {
        for id in skipped {
            let reason = self
                .graph
                .node(id)
                .and_then(|n| n.skip_reason().cloned())
                .unwrap_or_else(|| fallback.clone());
            self.report
                .outcomes
                .insert(id.clone(), NodeOutcome::Skipped(reason));
            self.record(id, NodeStatus::Skipped, commands);
        }
    }

    /// Skip every node not yet started. Consumers go first so each node is
    /// recorded as cancelled rather than as an upstream skip.
    fn on_cancel(&mut self, commands: &mut Vec<CoreCommand>) -> Result<()> {
        if self.cancelled {
            return Ok(());
        }
        self.cancelled = true;

        let mut unstarted: Vec<(Reverse<usize>, TaskId)> = self
            .graph
            .nodes()
            .filter(|n| n.status().is_unstarted())
            .map(|n| (Reverse(self.rank(n.id())), n.id().clone()))
            .collect();
        unstarted.sort();

        info!(
            skipped = unstarted.len(),
            in_flight = self.running.len(),
            "cancellation requested; no further dispatch"
        );

        for (_, id) in unstarted {
            if !self.graph.status(&id).is_some_and(NodeStatus::is_unstarted) {
                continue;
            }
            let skipped = self.graph.skip(&id, SkipReason::Cancelled)?;
            self.report
                .outcomes
                .insert(id.clone(), NodeOutcome::Skipped(SkipReason::Cancelled));
            self.record(&id, NodeStatus::Skipped, commands);
            self.record_skipped(&skipped, SkipReason::Cancelled, commands);
        }
        Ok(())
    }

    fn promote_ready(&mut self, commands: &mut Vec<CoreCommand>) -> Result<()> {
        for id in self.graph.ready_nodes() {
            self.graph.mark(&id, NodeStatus::Ready)?;
            self.record(&id, NodeStatus::Ready, commands);
        }
        Ok(())
    }

    fn rank(&self, id: &TaskId) -> usize {
        self.ranks.get(id).copied().unwrap_or(0)
    }

    /// Dispatch Ready nodes by (rank, identity). Returns whether memory held
    /// a candidate back.
    fn dispatch(
        &mut self,
        snapshot: &ResourceSnapshot,
        commands: &mut Vec<CoreCommand>,
    ) -> Result<bool> {
        let mut candidates: Vec<(usize, TaskId)> = self
            .graph
            .nodes()
            .filter(|n| n.status() == NodeStatus::Ready)
            .map(|n| (self.rank(n.id()), n.id().clone()))
            .collect();
        if candidates.is_empty() || self.running.len() >= self.max_workers {
            return Ok(false);
        }
        candidates.sort();

        // Estimates of running tasks stay reserved until they finish.
        let committed: u64 = self
            .running
            .values()
            .fold(0, |sum, estimate| sum.saturating_add(*estimate));
        let mut headroom = match self.backpressure.headroom(snapshot) {
            Ok(room) => Some(room.saturating_sub(committed)),
            Err(pressure) => {
                commands.push(CoreCommand::MemoryPressure(pressure));
                None
            }
        };

        let mut batch = Vec::new();
        let mut stalled = false;

        for (_, id) in candidates {
            if self.running.len() >= self.max_workers {
                break;
            }
            let estimate = self
                .graph
                .node(&id)
                .map(|n| n.estimated_bytes())
                .unwrap_or(0);
            let idle = self.running.is_empty();

            if !admit(&mut headroom, estimate, idle) {
                debug!(
                    id = %id.short(),
                    estimate,
                    headroom = ?headroom,
                    committed,
                    running = self.running.len(),
                    "holding back dispatch until memory frees up"
                );
                stalled = true;
                break;
            }

            batch.push(self.start(&id, estimate, commands)?);
        }

        if !batch.is_empty() {
            commands.push(CoreCommand::Dispatch(batch));
        }
        Ok(stalled)
    }

    fn start(
        &mut self,
        id: &TaskId,
        estimate: u64,
        commands: &mut Vec<CoreCommand>,
    ) -> Result<DispatchedTask> {
        self.graph.mark(id, NodeStatus::Running)?;
        self.running.insert(id.clone(), estimate);
        self.report.dispatch_order.push(id.clone());
        self.record(id, NodeStatus::Running, commands);

        let node = self
            .graph
            .node(id)
            .ok_or_else(|| AnadagError::UnknownTask(id.clone()))?;

        let mut inputs = Vec::with_capacity(node.task().inputs().len());
        for input in node.task().inputs() {
            match input {
                InputRef::Dataset(dataset) => {
                    // Handles not attached to the node are loaded by identity.
                    let handle = node.dataset(dataset).cloned().unwrap_or_else(|| {
                        Arc::new(DatasetHandle::new(dataset.as_str(), 0, Vec::new()))
                    });
                    inputs.push(JobInput::Dataset(handle));
                }
                InputRef::Task(producer) => {
                    let value = self
                        .report
                        .result(producer)
                        .cloned()
                        .ok_or_else(|| AnadagError::UnknownTask(producer.clone()))?;
                    inputs.push(JobInput::Result {
                        id: producer.clone(),
                        value,
                    });
                }
            }
        }

        debug!(task = %node.label(), id = %id.short(), estimate, "dispatching task");

        Ok(DispatchedTask {
            id: id.clone(),
            label: node.label().to_string(),
            task: Arc::clone(node.task()),
            inputs,
            timeout: node.timeout().or(self.default_timeout),
            estimated_bytes: estimate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TimeoutError;
    use crate::graph::NodeSpec;
    use crate::task::{Params, Task};
    use serde_json::json;

    fn task(name: &str) -> Task {
        Task::new(name, Vec::new(), Params::new())
    }

    fn plenty() -> ResourceSnapshot {
        ResourceSnapshot::new(u64::MAX / 2, 0)
    }

    fn ok(id: &TaskId) -> SchedulerEvent {
        SchedulerEvent::WorkerFinished {
            id: id.clone(),
            result: Ok(Arc::new(json!(id.short()))),
        }
    }

    fn ids(step: &CoreStep) -> Vec<TaskId> {
        step.dispatched().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn dispatch_order_is_rank_then_identity() {
        let mut g = RelationGraph::new();
        let a = g.add_task(task("a"), []).unwrap();
        let b = g.add_task(task("b"), []).unwrap();
        let c = g.add_task(task("c"), [&a]).unwrap();

        let mut core = SchedulerCore::new(g, &SchedulerSettings::new(8, u64::MAX)).unwrap();
        let step = core.step(SchedulerEvent::Started, &plenty()).unwrap();

        let mut roots = vec![a.clone(), b.clone()];
        roots.sort();
        assert_eq!(ids(&step), roots);

        let step = core.step(ok(&a), &plenty()).unwrap();
        assert_eq!(ids(&step), vec![c]);
        assert!(step.keep_running);
    }

    #[test]
    fn worker_limit_caps_running_tasks() {
        let mut g = RelationGraph::new();
        for name in ["a", "b", "c"] {
            g.add_task(task(name), []).unwrap();
        }

        let mut core = SchedulerCore::new(g, &SchedulerSettings::new(2, u64::MAX)).unwrap();
        let step = core.step(SchedulerEvent::Started, &plenty()).unwrap();
        assert_eq!(step.dispatched().count(), 2);
        assert_eq!(core.running(), 2);
        assert_eq!(core.pending_dispatch(), 1);
        assert!(!step.stalled);
    }

    #[test]
    fn dispatched_task_carries_producer_results_and_timeout() {
        let mut g = RelationGraph::new();
        let a = g.add_task(task("a"), []).unwrap();
        let consumer = Task::new("b", vec![InputRef::Task(a.clone())], Params::new());
        g.add_task_with(
            consumer,
            [],
            NodeSpec::labelled("b").with_timeout(Duration::from_secs(3)),
        )
        .unwrap();

        let settings =
            SchedulerSettings::new(1, u64::MAX).with_default_timeout(Duration::from_secs(60));
        let mut core = SchedulerCore::new(g, &settings).unwrap();

        let step = core.step(SchedulerEvent::Started, &plenty()).unwrap();
        let first = step.dispatched().next().unwrap();
        assert_eq!(first.timeout, Some(Duration::from_secs(60)));

        let step = core.step(ok(&a), &plenty()).unwrap();
        let second = step.dispatched().next().unwrap();
        assert_eq!(second.label, "b");
        assert_eq!(second.timeout, Some(Duration::from_secs(3)));
        assert!(matches!(
            &second.inputs[..],
            [JobInput::Result { id, value }] if id == &a && **value == json!(a.short())
        ));
    }

    #[test]
    fn timeout_failure_skips_consumers() {
        let mut g = RelationGraph::new();
        let a = g.add_task(task("a"), []).unwrap();
        let b = g.add_task(task("b"), [&a]).unwrap();

        let mut core = SchedulerCore::new(g, &SchedulerSettings::new(1, u64::MAX)).unwrap();
        core.step(SchedulerEvent::Started, &plenty()).unwrap();

        let timeout = TimeoutError {
            task: a.clone(),
            limit: Duration::from_millis(5),
        };
        let step = core
            .step(
                SchedulerEvent::WorkerFinished {
                    id: a.clone(),
                    result: Err(timeout.into()),
                },
                &plenty(),
            )
            .unwrap();
        assert!(!step.keep_running);

        let report = core.into_report();
        assert!(report.outcome(&a).unwrap().error().unwrap().is_timeout());
        assert!(matches!(
            report.outcome(&b),
            Some(NodeOutcome::Skipped(SkipReason::Upstream(origin))) if origin == &a
        ));
    }

    #[test]
    fn cancel_skips_unstarted_and_waits_for_running() {
        let mut g = RelationGraph::new();
        let a = g.add_task(task("a"), []).unwrap();
        let b = g.add_task(task("b"), [&a]).unwrap();
        let c = g.add_task(task("c"), []).unwrap();

        let mut core = SchedulerCore::new(g, &SchedulerSettings::new(1, u64::MAX)).unwrap();
        let step = core.step(SchedulerEvent::Started, &plenty()).unwrap();
        assert_eq!(ids(&step), vec![a.clone().min(c.clone())]);
        let running = ids(&step).remove(0);

        let step = core.step(SchedulerEvent::CancelRequested, &plenty()).unwrap();
        assert!(step.keep_running);
        assert_eq!(step.dispatched().count(), 0);

        let step = core.step(ok(&running), &plenty()).unwrap();
        assert!(!step.keep_running);
        assert_eq!(step.dispatched().count(), 0);

        let report = core.into_report();
        assert_eq!(report.status(&running), Some(NodeStatus::Done));
        assert!(matches!(
            report.outcome(&b),
            Some(NodeOutcome::Skipped(SkipReason::Cancelled))
        ));
        assert_eq!(report.count(NodeStatus::Skipped), 2);
    }

    #[test]
    fn oversized_task_waits_for_running_work() {
        let mut g = RelationGraph::new();
        let small = g
            .add_task_with(task("small"), [], NodeSpec::labelled("small").with_estimated_bytes(10))
            .unwrap();
        let big = g
            .add_task_with(task("big"), [], NodeSpec::labelled("big").with_estimated_bytes(500))
            .unwrap();

        // ceiling 1000, margin 100, in use 300 -> headroom 600
        let settings = SchedulerSettings::new(4, 1000).with_safety_margin(0.1);
        let mut core = SchedulerCore::new(g, &settings).unwrap();
        let snapshot = ResourceSnapshot::new(10_000, 300);

        // Ranks tie, so identity decides which goes first.
        let step = core.step(SchedulerEvent::Started, &snapshot).unwrap();
        if small < big {
            assert_eq!(ids(&step), vec![small.clone(), big.clone()]);
        } else {
            assert_eq!(ids(&step), vec![big.clone(), small.clone()]);
        }

        // Less room: only the head fits when idle.
        let mut g = RelationGraph::new();
        let x = g
            .add_task_with(task("x"), [], NodeSpec::labelled("x").with_estimated_bytes(400))
            .unwrap();
        let y = g
            .add_task_with(task("y"), [], NodeSpec::labelled("y").with_estimated_bytes(400))
            .unwrap();
        let mut core = SchedulerCore::new(g, &settings).unwrap();
        let step = core.step(SchedulerEvent::Started, &snapshot).unwrap();
        assert_eq!(step.dispatched().count(), 1);
        assert!(step.stalled);

        let first = ids(&step).remove(0);
        let second = if first == x { y } else { x };
        let step = core.step(ok(&first), &snapshot).unwrap();
        assert_eq!(ids(&step), vec![second]);
    }

    #[test]
    fn running_estimates_stay_reserved_across_ticks() {
        let mut g = RelationGraph::new();
        for name in ["x", "y", "z"] {
            g.add_task_with(task(name), [], NodeSpec::labelled(name).with_estimated_bytes(400))
                .unwrap();
        }

        // ceiling 1000, margin 100, in use 300 -> headroom 600
        let settings = SchedulerSettings::new(4, 1000).with_safety_margin(0.1);
        let mut core = SchedulerCore::new(g, &settings).unwrap();
        let snapshot = ResourceSnapshot::new(10_000, 300);

        let step = core.step(SchedulerEvent::Started, &snapshot).unwrap();
        assert_eq!(step.dispatched().count(), 1);
        let first = ids(&step).remove(0);

        for _ in 0..3 {
            let step = core.step(SchedulerEvent::Tick, &snapshot).unwrap();
            assert_eq!(step.dispatched().count(), 0);
            assert!(step.stalled);
            assert_eq!(core.running(), 1);
        }

        // Finishing frees the reservation; the next one starts alone.
        let step = core.step(ok(&first), &snapshot).unwrap();
        assert_eq!(step.dispatched().count(), 1);
        assert_eq!(core.running(), 1);
    }

    #[test]
    fn rejects_graph_that_already_ran() {
        let mut g = RelationGraph::new();
        let a = g.add_task(task("a"), []).unwrap();
        g.mark(&a, NodeStatus::Ready).unwrap();
        g.mark(&a, NodeStatus::Running).unwrap();

        let err = SchedulerCore::new(g, &SchedulerSettings::new(1, u64::MAX)).unwrap_err();
        assert!(matches!(err, AnadagError::ConfigError(_)));
    }
}
