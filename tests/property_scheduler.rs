use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use anadag::errors::TaskError;
use anadag::graph::{NodeSpec, NodeStatus, RelationGraph};
use anadag::resource::ResourceSnapshot;
use anadag::scheduler::{SchedulerCore, SchedulerEvent, SchedulerSettings};
use anadag::task::TaskId;
use anadag_test_utils::builders::task;

// Strategy to generate a DAG as dependency lists.
// Acyclicity: task N may only depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, deps)| {
                    if i == 0 {
                        return Vec::new();
                    }
                    let set: BTreeSet<usize> = deps.into_iter().map(|d| d % i).collect();
                    set.into_iter().collect()
                })
                .collect()
        })
    })
}

fn build(deps: &[Vec<usize>]) -> (RelationGraph, Vec<TaskId>) {
    let mut g = RelationGraph::new();
    let mut ids: Vec<TaskId> = Vec::with_capacity(deps.len());
    for (i, producers) in deps.iter().enumerate() {
        let name = format!("task_{i}");
        let producer_ids: Vec<&TaskId> = producers.iter().map(|&p| &ids[p]).collect();
        let id = g
            .add_task_with(task(&name), producer_ids, NodeSpec::labelled(name.clone()))
            .unwrap();
        ids.push(id);
    }
    (g, ids)
}

proptest! {
    #[test]
    fn scheduler_always_terminates(
        deps in dag_strategy(12),
        failing in proptest::collection::btree_set(0..12usize, 0..4),
        workers in 1..4usize,
        complete_newest_first in any::<bool>(),
    ) {
        let (graph, ids) = build(&deps);
        let failing: BTreeSet<TaskId> = failing
            .into_iter()
            .filter(|&i| i < ids.len())
            .map(|i| ids[i].clone())
            .collect();

        let mut core = SchedulerCore::new(graph, &SchedulerSettings::new(workers, u64::MAX)).unwrap();
        let snapshot = ResourceSnapshot::new(u64::MAX / 2, 0);

        let mut running: VecDeque<TaskId> = VecDeque::new();
        let mut event = SchedulerEvent::Started;
        let mut steps = 0;

        loop {
            steps += 1;
            prop_assert!(steps <= 10 * ids.len() + 10, "scheduler did not terminate");

            let step = core.step(event, &snapshot).unwrap();
            running.extend(step.dispatched().map(|t| t.id.clone()));
            prop_assert!(core.running() <= workers);
            if !step.keep_running {
                break;
            }

            let id = if complete_newest_first { running.pop_back() } else { running.pop_front() };
            let id = id.expect("a running task while the run is live");
            let result = if failing.contains(&id) {
                Err(TaskError::compute(id.clone(), anyhow::anyhow!("scripted failure")))
            } else {
                Ok(Arc::new(json!(null)))
            };
            event = SchedulerEvent::WorkerFinished { id, result };
        }

        prop_assert!(running.is_empty());
        let report = core.into_report();
        prop_assert_eq!(report.outcomes.len(), ids.len());

        for (i, id) in ids.iter().enumerate() {
            let status = report.status(id).unwrap();
            if status == NodeStatus::Done {
                // Nothing upstream of a Done node failed or was skipped.
                for &p in &deps[i] {
                    prop_assert_eq!(report.status(&ids[p]), Some(NodeStatus::Done));
                }
                prop_assert!(!failing.contains(id));
            }
            if status == NodeStatus::Skipped {
                prop_assert!(!report.dispatch_order.contains(id));
            }
        }
    }
}
