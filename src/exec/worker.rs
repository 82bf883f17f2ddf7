// src/exec/worker.rs

//! Production backend: cache lookup, dataset loading and analysis compute
//! on tokio's blocking pool.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing::debug;

use crate::analysis::{AnalysisInput, AnalysisRegistry};
use crate::cache::ResultCache;
use crate::dataset::DatasetLoader;
use crate::errors::{TaskError, panic_message};
use crate::exec::backend::{TaskFuture, TaskResult, WorkerBackend};
use crate::scheduler::{DispatchedTask, JobInput};

/// Runs analyses from a registry, consulting the result cache first.
#[derive(Clone)]
pub struct PoolBackend {
    registry: Arc<AnalysisRegistry>,
    loader: Arc<dyn DatasetLoader>,
    cache: Arc<ResultCache>,
}

impl PoolBackend {
    pub fn new(
        registry: Arc<AnalysisRegistry>,
        loader: Arc<dyn DatasetLoader>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            registry,
            loader,
            cache,
        }
    }
}

impl WorkerBackend for PoolBackend {
    fn execute(&self, task: DispatchedTask) -> TaskFuture {
        let backend = self.clone();

        Box::pin(async move {
            let id = task.id.clone();
            match tokio::task::spawn_blocking(move || backend.run(&task)).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(TaskError::compute(
                    id,
                    anyhow!("analysis panicked: {}", panic_message(e.into_panic())),
                )),
                Err(e) => Err(TaskError::compute(id, e)),
            }
        })
    }
}

impl PoolBackend {
    /// Run one task synchronously. Datasets are only loaded on a cache miss.
    pub fn run(&self, job: &DispatchedTask) -> TaskResult {
        let name = job.task.analysis();
        let Some(analysis) = self.registry.get(name) else {
            return Err(TaskError::compute(
                job.id.clone(),
                anyhow!("no analysis registered under '{}'", name),
            ));
        };

        self.cache
            .get_or_compute(&job.task, || {
                let inputs = materialize(self.loader.as_ref(), &job.inputs)?;
                debug!(task = %job.label, inputs = inputs.len(), "running analysis");
                analysis
                    .compute(&inputs, job.task.params())
                    .with_context(|| format!("analysis '{}' ({}) failed", job.label, name))
            })
            .map_err(|detail| TaskError::shared(job.id.clone(), detail))
    }
}

/// Load dataset inputs and pass upstream results through, in input order.
pub fn materialize(
    loader: &dyn DatasetLoader,
    inputs: &[JobInput],
) -> anyhow::Result<Vec<AnalysisInput>> {
    inputs
        .iter()
        .map(|input| match input {
            JobInput::Dataset(handle) => loader
                .load(handle)
                .map(AnalysisInput::Table)
                .with_context(|| format!("loading dataset '{}'", handle.locator())),
            JobInput::Result { value, .. } => Ok(AnalysisInput::Result(Arc::clone(value))),
        })
        .collect()
}
