// src/graph/build.rs

//! Turn a validated [`AnalysisRequest`] into a [`RelationGraph`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::model::{AnalysisRequest, DatasetConfig};
use crate::config::validate::analysis_order;
use crate::dataset::{DatasetHandle, file_len};
use crate::errors::{AnadagError, Result};
use crate::graph::node::NodeSpec;
use crate::graph::relation::RelationGraph;
use crate::task::{InputRef, Task, TaskId};

/// A graph built from a request, plus the name -> identity mapping needed to
/// read results back by analysis name.
#[derive(Debug, Clone)]
pub struct BuiltGraph {
    pub graph: RelationGraph,
    /// Analysis name -> task identity. Analyses with equal kind, inputs
    /// and params share one identity.
    pub names: BTreeMap<String, TaskId>,
    pub datasets: BTreeMap<String, Arc<DatasetHandle>>,
}

/// Build the task graph for `request`.
///
/// Analyses are added producers first. Each node's memory estimate is the
/// sum of its dataset inputs' size estimates, its timeout the analysis'
/// `timeout_secs` or `[scheduler].default_timeout_secs`.
pub fn build_from_request(request: &AnalysisRequest) -> Result<BuiltGraph> {
    let mut datasets = BTreeMap::new();
    for (name, cfg) in request.dataset.iter() {
        let handle = dataset_handle(cfg)?;
        debug!(dataset = %name, id = %handle.id(), bytes = handle.byte_size_estimate(), "resolved dataset");
        datasets.insert(name.clone(), Arc::new(handle));
    }

    let mut graph = RelationGraph::new();
    let mut names: BTreeMap<String, TaskId> = BTreeMap::new();

    for name in analysis_order(&request.analysis)? {
        let Some(cfg) = request.analysis.get(&name) else {
            continue;
        };

        let mut spec = NodeSpec::labelled(name.clone());
        if let Some(timeout) = cfg.timeout().or_else(|| request.scheduler.default_timeout()) {
            spec = spec.with_timeout(timeout);
        }

        let mut inputs = Vec::with_capacity(cfg.inputs.len());
        let mut deps = Vec::new();
        for input in cfg.inputs.iter() {
            if let Some(handle) = datasets.get(input) {
                inputs.push(InputRef::Dataset(handle.id().clone()));
                spec = spec.with_dataset(Arc::clone(handle));
            } else {
                let id = resolve(&names, &name, input)?;
                inputs.push(InputRef::Task(id.clone()));
                deps.push(id);
            }
        }
        for after in cfg.after.iter() {
            deps.push(resolve(&names, &name, after)?);
        }

        let task = Task::new(cfg.effective_kind(&name), inputs, cfg.params.clone());
        let id = graph.add_task_with(task, deps.iter(), spec)?;
        names.insert(name, id);
    }

    info!(
        analyses = names.len(),
        tasks = graph.len(),
        datasets = datasets.len(),
        "built relation graph"
    );

    Ok(BuiltGraph {
        graph,
        names,
        datasets,
    })
}

fn resolve(names: &BTreeMap<String, TaskId>, analysis: &str, dep: &str) -> Result<TaskId> {
    names.get(dep).cloned().ok_or_else(|| {
        AnadagError::ConfigError(format!(
            "analysis '{}' references '{}', which is neither a dataset nor an earlier analysis",
            analysis, dep
        ))
    })
}

fn dataset_handle(cfg: &DatasetConfig) -> Result<DatasetHandle> {
    let path = Path::new(&cfg.source);
    if cfg.use_hash {
        return Ok(DatasetHandle::content_addressed(
            path,
            cfg.size_bytes,
            cfg.shape.clone(),
        )?);
    }

    let size = match cfg.size_bytes {
        Some(size) => size,
        None if path.is_file() => file_len(path)?,
        None => 0,
    };
    Ok(DatasetHandle::new(cfg.source.clone(), size, cfg.shape.clone()))
}
