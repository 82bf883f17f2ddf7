// src/analysis.rs

//! Analysis capabilities, looked up by name at dispatch time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::dataset::Table;
use crate::task::Params;

/// One materialised input handed to an analysis, in the task's input order.
#[derive(Debug, Clone)]
pub enum AnalysisInput {
    Table(Arc<Table>),
    /// Result of an upstream analysis.
    Result(Arc<Value>),
}

impl AnalysisInput {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            AnalysisInput::Table(t) => Some(t),
            AnalysisInput::Result(_) => None,
        }
    }

    pub fn as_result(&self) -> Option<&Value> {
        match self {
            AnalysisInput::Result(v) => Some(v),
            AnalysisInput::Table(_) => None,
        }
    }
}

/// A named computation over tables and upstream results.
///
/// Implementations run on blocking worker threads and must be
/// deterministic in their inputs and parameters for caching to be sound.
pub trait Analysis: Send + Sync {
    fn compute(&self, inputs: &[AnalysisInput], params: &Params) -> Result<Value>;
}

impl<F> Analysis for F
where
    F: Fn(&[AnalysisInput], &Params) -> Result<Value> + Send + Sync,
{
    fn compute(&self, inputs: &[AnalysisInput], params: &Params) -> Result<Value> {
        self(inputs, params)
    }
}

/// Analyses keyed by the name tasks refer to them by.
#[derive(Clone, Default)]
pub struct AnalysisRegistry {
    analyses: BTreeMap<String, Arc<dyn Analysis>>,
}

impl fmt::Debug for AnalysisRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRegistry")
            .field("analyses", &self.analyses.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AnalysisRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `analysis` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, analysis: impl Analysis + 'static) {
        self.analyses.insert(name.into(), Arc::new(analysis));
    }

    pub fn with(mut self, name: impl Into<String>, analysis: impl Analysis + 'static) -> Self {
        self.register(name, analysis);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Analysis>> {
        self.analyses.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.analyses.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.analyses.keys().map(String::as_str)
    }
}
