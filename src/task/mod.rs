// src/task/mod.rs

//! Immutable analysis tasks and their identities.
//!
//! - [`Task`] names an analysis, the ordered identities of its inputs, and a
//!   parameter mapping. It owns no data.
//! - [`TaskId`] is the stable hash of those three things; see [`identity`].

pub mod identity;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetId;

/// Parameter mapping of an analysis. Keys are kept sorted.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Stable task identity: lowercase hex blake3 digest of the canonical task
/// encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn from_hex(hex: String) -> Self {
        TaskId(hex)
    }

    /// Parse a printed identity: 64 lowercase hex characters.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| TaskId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and tables.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one input consumed by a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputRef {
    /// A dataset, referenced by its dataset identity.
    Dataset(DatasetId),
    /// The result of another task.
    Task(TaskId),
}

impl InputRef {
    pub fn as_task(&self) -> Option<&TaskId> {
        match self {
            InputRef::Task(id) => Some(id),
            InputRef::Dataset(_) => None,
        }
    }
}

/// A single analysis invocation: analysis name, ordered inputs, parameters.
///
/// Immutable once created; the identity is computed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    analysis: String,
    inputs: Vec<InputRef>,
    params: Params,
}

impl Task {
    pub fn new(analysis: impl Into<String>, inputs: Vec<InputRef>, params: Params) -> Self {
        let analysis = analysis.into();
        let id = identity::task_identity(&analysis, &inputs, &params);
        Self {
            id,
            analysis,
            inputs,
            params,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn analysis(&self) -> &str {
        &self.analysis
    }

    pub fn inputs(&self) -> &[InputRef] {
        &self.inputs
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Identities of the tasks whose results this task consumes, in input
    /// order.
    pub fn task_inputs(&self) -> impl Iterator<Item = &TaskId> {
        self.inputs.iter().filter_map(InputRef::as_task)
    }
}
