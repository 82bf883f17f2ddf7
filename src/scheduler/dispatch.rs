// src/scheduler/dispatch.rs

//! What the core hands to workers, and the memory admission rule.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::dataset::DatasetHandle;
use crate::task::{Task, TaskId};

/// One resolved input of a dispatched task, in the task's input order.
#[derive(Debug, Clone)]
pub enum JobInput {
    /// Loaded by the worker, only when the result is not cached.
    Dataset(Arc<DatasetHandle>),
    /// An upstream result, already in memory.
    Result { id: TaskId, value: Arc<Value> },
}

/// A task moved to Running, with everything a worker needs.
#[derive(Debug, Clone)]
pub struct DispatchedTask {
    pub id: TaskId,
    pub label: String,
    pub task: Arc<Task>,
    pub inputs: Vec<JobInput>,
    pub timeout: Option<Duration>,
    pub estimated_bytes: u64,
}

/// Decide whether the next candidate (in dispatch order) may start.
///
/// `headroom` is the memory still uncommitted this step, `None` under
/// memory pressure. When nothing is running one candidate is always
/// admitted, so a run can never stall with an idle pool.
pub(crate) fn admit(headroom: &mut Option<u64>, estimate: u64, idle: bool) -> bool {
    match headroom {
        Some(room) if estimate <= *room => {
            *room -= estimate;
            true
        }
        Some(room) if idle => {
            *room = 0;
            true
        }
        None if idle => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::admit;

    #[test]
    fn admission_respects_headroom() {
        let mut room = Some(100);
        assert!(admit(&mut room, 60, false));
        assert!(!admit(&mut room, 60, false));
        assert!(admit(&mut room, 40, false));
        assert_eq!(room, Some(0));
    }

    #[test]
    fn idle_pool_admits_one_regardless_of_memory() {
        let mut pressure = None;
        assert!(admit(&mut pressure, 10, true));
        assert!(!admit(&mut pressure, 0, false));

        let mut room = Some(5);
        assert!(admit(&mut room, 50, true));
        assert_eq!(room, Some(0));
    }
}
