// src/scheduler/report.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::errors::TaskError;
use crate::graph::{NodeStatus, SkipReason};
use crate::task::TaskId;

/// Final state of one node.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Done(Arc<Value>),
    Failed(TaskError),
    Skipped(SkipReason),
}

impl NodeOutcome {
    pub fn status(&self) -> NodeStatus {
        match self {
            NodeOutcome::Done(_) => NodeStatus::Done,
            NodeOutcome::Failed(_) => NodeStatus::Failed,
            NodeOutcome::Skipped(_) => NodeStatus::Skipped,
        }
    }

    pub fn value(&self) -> Option<&Arc<Value>> {
        match self {
            NodeOutcome::Done(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            NodeOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// One status change, in the order the scheduler applied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub id: TaskId,
    pub label: String,
    pub status: NodeStatus,
}

/// Result of a scheduler run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: BTreeMap<TaskId, NodeOutcome>,
    /// Nodes in the order they were dispatched.
    pub dispatch_order: Vec<TaskId>,
    pub transitions: Vec<Transition>,
}

impl RunReport {
    /// Every node is Done.
    pub fn is_success(&self) -> bool {
        self.outcomes
            .values()
            .all(|o| matches!(o, NodeOutcome::Done(_)))
    }

    pub fn outcome(&self, id: &TaskId) -> Option<&NodeOutcome> {
        self.outcomes.get(id)
    }

    pub fn status(&self, id: &TaskId) -> Option<NodeStatus> {
        self.outcomes.get(id).map(NodeOutcome::status)
    }

    pub fn result(&self, id: &TaskId) -> Option<&Arc<Value>> {
        self.outcomes.get(id).and_then(NodeOutcome::value)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.outcomes.values().filter(|o| o.status() == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TaskId, &TaskError)> {
        self.outcomes
            .iter()
            .filter_map(|(id, o)| o.error().map(|e| (id, e)))
    }

    /// Failed and Skipped nodes. Nothing is retried automatically; rerunning
    /// the same graph against a warm cache recomputes only these.
    pub fn retry_candidates(&self) -> Vec<TaskId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !matches!(o, NodeOutcome::Done(_)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Status sequence of one node.
    pub fn history(&self, id: &TaskId) -> Vec<NodeStatus> {
        self.transitions
            .iter()
            .filter(|t| &t.id == id)
            .map(|t| t.status)
            .collect()
    }
}
