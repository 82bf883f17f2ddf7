mod common;
use crate::common::{TestResult, add, scheduler};

use std::time::Duration;

use anadag::graph::{NodeSpec, NodeStatus, RelationGraph, SkipReason};
use anadag::scheduler::{NodeOutcome, SchedulerSettings};
use anadag_test_utils::builders::task;
use anadag_test_utils::fake_backend::FakeBackend;
use anadag_test_utils::{init_tracing, with_timeout};

#[tokio::test]
async fn timeout_fails_node_and_skips_consumers() -> TestResult {
    init_tracing();

    let mut g = RelationGraph::new();
    let slow = g.add_task_with(
        task("slow"),
        [],
        NodeSpec::labelled("slow").with_timeout(Duration::from_millis(50)),
    )?;
    let after = add(&mut g, "after", &[&slow]);
    let other = add(&mut g, "other", &[]);

    let backend = FakeBackend::new().sleeping("slow", 10_000);
    let (scheduler, _reporter) = scheduler(backend.clone(), SchedulerSettings::new(2, u64::MAX));
    let report = with_timeout(scheduler.run(g)).await?;

    assert_eq!(report.status(&slow), Some(NodeStatus::Failed));
    let err = report.outcome(&slow).and_then(NodeOutcome::error).unwrap();
    assert!(err.is_timeout());
    assert_eq!(err.task(), &slow);

    assert_eq!(report.status(&after), Some(NodeStatus::Skipped));
    assert_eq!(report.status(&other), Some(NodeStatus::Done));
    assert!(backend.started().contains(&"slow".to_string()));
    Ok(())
}

#[tokio::test]
async fn default_timeout_applies_to_nodes_without_one() -> TestResult {
    init_tracing();

    let mut g = RelationGraph::new();
    let a = add(&mut g, "a", &[]);

    let backend = FakeBackend::new().sleeping("a", 10_000);
    let settings =
        SchedulerSettings::new(1, u64::MAX).with_default_timeout(Duration::from_millis(30));
    let (scheduler, _reporter) = scheduler(backend, settings);
    let report = with_timeout(scheduler.run(g)).await?;

    assert!(report.outcome(&a).and_then(NodeOutcome::error).unwrap().is_timeout());
    Ok(())
}

#[tokio::test]
async fn cancel_lets_running_work_finish_and_skips_the_rest() -> TestResult {
    init_tracing();

    let mut g = RelationGraph::new();
    let a = add(&mut g, "a", &[]);
    let b = add(&mut g, "b", &[&a]);
    let c = add(&mut g, "c", &[&b]);

    let backend = FakeBackend::new().sleeping("a", 200);
    let (scheduler, reporter) = scheduler(backend.clone(), SchedulerSettings::new(1, u64::MAX));
    let cancel = scheduler.cancel_handle();

    let run = tokio::spawn(scheduler.run(g));
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel().await;

    let report = with_timeout(run).await??;

    assert_eq!(report.status(&a), Some(NodeStatus::Done));
    for id in [&b, &c] {
        assert!(matches!(
            report.outcome(id),
            Some(NodeOutcome::Skipped(SkipReason::Cancelled))
        ));
    }
    assert_eq!(backend.started(), vec!["a".to_string()]);
    assert_eq!(reporter.statuses_of("b"), vec![NodeStatus::Skipped]);
    Ok(())
}
