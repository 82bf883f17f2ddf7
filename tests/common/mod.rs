#![allow(dead_code)]

use std::sync::Arc;

use anadag::graph::{NodeSpec, RelationGraph};
use anadag::resource::StaticMonitor;
use anadag::scheduler::{ParallelScheduler, SchedulerSettings};
use anadag::task::TaskId;
use anadag_test_utils::builders::task;
use anadag_test_utils::fake_backend::FakeBackend;
use anadag_test_utils::monitors::RecordingReporter;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Add a task labelled `name` that runs after `deps`.
pub fn add(graph: &mut RelationGraph, name: &str, deps: &[&TaskId]) -> TaskId {
    graph
        .add_task_with(task(name), deps.iter().copied(), NodeSpec::labelled(name))
        .expect("test graph must be acyclic")
}

/// Scheduler over `backend` with unlimited memory and a recording reporter.
pub fn scheduler(
    backend: FakeBackend,
    settings: SchedulerSettings,
) -> (ParallelScheduler<FakeBackend>, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let scheduler = ParallelScheduler::new(backend, settings)
        .with_monitor(Arc::new(StaticMonitor::unlimited()))
        .with_reporter(reporter.clone());
    (scheduler, reporter)
}
