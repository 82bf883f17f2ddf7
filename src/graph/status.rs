// src/graph/status.rs

//! Node statuses and the transitions allowed between them.

use serde::Serialize;

use crate::task::TaskId;

/// Lifecycle status of a node in a [`RelationGraph`](crate::graph::RelationGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Waiting for producers.
    Pending,
    /// All producers are Done; not yet dispatched.
    Ready,
    /// Dispatched to a worker.
    Running,
    Done,
    Failed,
    /// Never scheduled, because an upstream node failed or the run was
    /// cancelled.
    Skipped,
}

impl NodeStatus {
    /// Allowed: Pending->Ready, Ready->Running, Running->Done,
    /// Running->Failed, Pending/Ready->Skipped.
    pub fn can_transition_to(self, to: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, to),
            (Pending, Ready)
                | (Ready, Running)
                | (Running, Done)
                | (Running, Failed)
                | (Pending, Skipped)
                | (Ready, Skipped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Done | NodeStatus::Failed | NodeStatus::Skipped)
    }

    /// Pending or Ready: may still be skipped.
    pub fn is_unstarted(self) -> bool {
        matches!(self, NodeStatus::Pending | NodeStatus::Ready)
    }
}

/// Why a node ended up Skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipReason {
    /// The referenced node failed (or was skipped) first.
    Upstream(TaskId),
    /// The run was cancelled before this node was dispatched.
    Cancelled,
    /// Skipped directly by the caller.
    Manual,
}
