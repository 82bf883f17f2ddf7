// src/pipeline.rs

//! Request in, named results out.
//!
//! A [`Pipeline`] ties the pieces together: it builds the graph for a
//! request, runs it on a [`ParallelScheduler`] with a [`PoolBackend`], and
//! maps outcomes back to analysis names.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::analysis::AnalysisRegistry;
use crate::cache::{self, CacheStats, ResultCache};
use crate::config::model::AnalysisRequest;
use crate::dataset::DatasetLoader;
use crate::errors::{Result, TaskError};
use crate::exec::PoolBackend;
use crate::graph::{BuiltGraph, NodeStatus, build_from_request};
use crate::progress::{LogReporter, ProgressReporter};
use crate::resource::{ResourceMonitor, SystemMonitor};
use crate::scheduler::{
    CancelHandle, NodeOutcome, ParallelScheduler, RunReport, SchedulerSettings,
};
use crate::task::TaskId;

/// Default in-memory cache budget when none is configured.
const DEFAULT_CACHE_BUDGET: u64 = 256 * 1024 * 1024;

pub struct Pipeline {
    registry: Arc<AnalysisRegistry>,
    loader: Arc<dyn DatasetLoader>,
    cache: Arc<ResultCache>,
    monitor: Arc<dyn ResourceMonitor>,
    reporter: Arc<dyn ProgressReporter>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(registry: AnalysisRegistry, loader: Arc<dyn DatasetLoader>) -> Self {
        Self {
            registry: Arc::new(registry),
            loader,
            cache: Arc::new(ResultCache::new(DEFAULT_CACHE_BUDGET)),
            monitor: Arc::new(SystemMonitor::new()),
            reporter: Arc::new(LogReporter),
        }
    }

    /// Pipeline whose cache follows the request's `[cache]` section.
    pub fn for_request(
        request: &AnalysisRequest,
        registry: AnalysisRegistry,
        loader: Arc<dyn DatasetLoader>,
    ) -> Result<Self> {
        let cache = cache::from_section(&request.cache)?;
        Ok(Self::new(registry, loader).with_cache(Arc::new(cache)))
    }

    /// Share a cache between pipelines or runs.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Build the graph for `request` without running it. Analyses the
    /// registry does not know are reported; they fail when dispatched.
    pub fn plan(&self, request: &AnalysisRequest) -> Result<BuiltGraph> {
        let built = build_from_request(request)?;
        for node in built.graph.nodes() {
            let kind = node.task().analysis();
            if !self.registry.contains(kind) {
                warn!(task = %node.label(), analysis = %kind, "no analysis registered under this name");
            }
        }
        Ok(built)
    }

    /// Run every analysis in `request`.
    pub async fn run(&self, request: &AnalysisRequest) -> Result<PipelineReport> {
        self.run_with_cancel(request, |_| {}).await
    }

    /// Like [`run`](Self::run); `on_start` receives a handle that cancels
    /// the run.
    pub async fn run_with_cancel<F>(
        &self,
        request: &AnalysisRequest,
        on_start: F,
    ) -> Result<PipelineReport>
    where
        F: FnOnce(CancelHandle),
    {
        let built = self.plan(request)?;
        let backend = PoolBackend::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.loader),
            Arc::clone(&self.cache),
        );

        let scheduler =
            ParallelScheduler::new(backend, SchedulerSettings::from_section(&request.scheduler))
                .with_monitor(Arc::clone(&self.monitor))
                .with_reporter(Arc::clone(&self.reporter));
        on_start(scheduler.cancel_handle());

        let run = scheduler.run(built.graph).await?;
        let cache = self.cache.stats();
        info!(
            hits = cache.hits,
            computations = cache.computations,
            cached_bytes = cache.bytes,
            "pipeline finished"
        );

        Ok(PipelineReport {
            run,
            names: built.names,
            cache,
        })
    }
}

/// Outcome of a pipeline run, addressable by analysis name.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run: RunReport,
    pub names: BTreeMap<String, TaskId>,
    /// Cache counters at the end of the run.
    pub cache: CacheStats,
}

impl PipelineReport {
    pub fn id(&self, name: &str) -> Option<&TaskId> {
        self.names.get(name)
    }

    pub fn outcome(&self, name: &str) -> Option<&NodeOutcome> {
        self.run.outcome(self.names.get(name)?)
    }

    pub fn status(&self, name: &str) -> Option<NodeStatus> {
        self.outcome(name).map(NodeOutcome::status)
    }

    pub fn result(&self, name: &str) -> Option<&Arc<Value>> {
        self.outcome(name).and_then(NodeOutcome::value)
    }

    pub fn error(&self, name: &str) -> Option<&TaskError> {
        self.outcome(name).and_then(NodeOutcome::error)
    }

    pub fn is_success(&self) -> bool {
        self.run.is_success()
    }

    /// Names whose analysis did not finish, sorted.
    pub fn unfinished(&self) -> Vec<&str> {
        self.names
            .iter()
            .filter(|(_, id)| self.run.status(id) != Some(NodeStatus::Done))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
