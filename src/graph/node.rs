// src/graph/node.rs

use std::sync::Arc;
use std::time::Duration;

use crate::dataset::{DatasetHandle, DatasetId};
use crate::graph::status::{NodeStatus, SkipReason};
use crate::task::{Task, TaskId};

/// Per-node settings that are not part of the task identity.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    /// Human-readable name for logs and reports. Defaults to the analysis
    /// name plus the short identity.
    pub label: Option<String>,
    /// Wall-clock budget once dispatched.
    pub timeout: Option<Duration>,
    /// Memory the task is expected to need while running.
    pub estimated_bytes: u64,
    /// Handles for the task's dataset inputs.
    pub datasets: Vec<Arc<DatasetHandle>>,
}

impl NodeSpec {
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_estimated_bytes(mut self, bytes: u64) -> Self {
        self.estimated_bytes = bytes;
        self
    }

    /// Attach a dataset input; its size estimate is added to the node's.
    pub fn with_dataset(mut self, handle: Arc<DatasetHandle>) -> Self {
        self.estimated_bytes = self
            .estimated_bytes
            .saturating_add(handle.byte_size_estimate());
        self.datasets.push(handle);
        self
    }
}

/// A task plus its scheduling state. Owned by the graph.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub(crate) task: Arc<Task>,
    pub(crate) status: NodeStatus,
    pub(crate) label: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) estimated_bytes: u64,
    pub(crate) datasets: Vec<Arc<DatasetHandle>>,
    pub(crate) skip_reason: Option<SkipReason>,
}

impl TaskNode {
    pub(crate) fn new(task: Task, spec: NodeSpec) -> Self {
        let label = spec
            .label
            .unwrap_or_else(|| format!("{}@{}", task.analysis(), task.id().short()));
        Self {
            task: Arc::new(task),
            status: NodeStatus::Pending,
            label,
            timeout: spec.timeout,
            estimated_bytes: spec.estimated_bytes,
            datasets: spec.datasets,
            skip_reason: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        self.task.id()
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn estimated_bytes(&self) -> u64 {
        self.estimated_bytes
    }

    /// Attached handle for a dataset input, if any.
    pub fn dataset(&self, id: &DatasetId) -> Option<&Arc<DatasetHandle>> {
        self.datasets.iter().find(|h| h.id() == id)
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        self.skip_reason.as_ref()
    }
}
