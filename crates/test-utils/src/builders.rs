#![allow(dead_code)]

use std::path::Path;

use serde_json::Value;

use anadag::config::{
    AnalysisConfig, AnalysisRequest, DatasetConfig, RawAnalysisRequest,
};
use anadag::errors::Result;
use anadag::task::{InputRef, Params, Task};
use anadag::types::{CachePolicy, CacheStorageMode};

/// Builder for `AnalysisRequest` to simplify test setup.
pub struct RequestBuilder {
    request: RawAnalysisRequest,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            request: RawAnalysisRequest::default(),
        }
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.request.scheduler.max_workers = Some(n);
        self
    }

    pub fn memory_ceiling(mut self, bytes: u64) -> Self {
        self.request.scheduler.memory_ceiling_bytes = Some(bytes);
        self
    }

    pub fn safety_margin(mut self, margin: f64) -> Self {
        self.request.scheduler.safety_margin = margin;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.request.scheduler.poll_interval_ms = ms;
        self
    }

    pub fn default_timeout_secs(mut self, secs: u64) -> Self {
        self.request.scheduler.default_timeout_secs = Some(secs);
        self
    }

    pub fn cache_budget(mut self, bytes: u64) -> Self {
        self.request.cache.budget_bytes = bytes;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.request.cache.policy = policy;
        self
    }

    /// Persist results under `dir`.
    pub fn cache_dir(mut self, dir: &Path) -> Self {
        self.request.cache.storage = CacheStorageMode::Dir;
        self.request.cache.dir = dir.to_path_buf();
        self
    }

    pub fn with_dataset(mut self, name: &str, dataset: DatasetConfig) -> Self {
        self.request.dataset.insert(name.to_string(), dataset);
        self
    }

    pub fn with_analysis(mut self, name: &str, analysis: AnalysisConfig) -> Self {
        self.request.analysis.insert(name.to_string(), analysis);
        self
    }

    pub fn raw(self) -> RawAnalysisRequest {
        self.request
    }

    pub fn try_build(self) -> Result<AnalysisRequest> {
        AnalysisRequest::try_from(self.request)
    }

    pub fn build(self) -> AnalysisRequest {
        self.try_build()
            .expect("Failed to build valid request from builder")
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `AnalysisConfig`.
pub struct AnalysisConfigBuilder {
    analysis: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn new() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
        }
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.analysis.kind = Some(kind.to_string());
        self
    }

    pub fn input(mut self, name: &str) -> Self {
        self.analysis.inputs.push(name.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.analysis.after.push(dep.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: Value) -> Self {
        self.analysis.params.insert(key.to_string(), value);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.analysis.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> AnalysisConfig {
        self.analysis
    }
}

impl Default for AnalysisConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `DatasetConfig`.
pub struct DatasetConfigBuilder {
    dataset: DatasetConfig,
}

impl DatasetConfigBuilder {
    pub fn new(source: &str) -> Self {
        Self {
            dataset: DatasetConfig {
                source: source.to_string(),
                size_bytes: None,
                shape: vec![],
                use_hash: false,
            },
        }
    }

    pub fn size_bytes(mut self, bytes: u64) -> Self {
        self.dataset.size_bytes = Some(bytes);
        self
    }

    pub fn shape(mut self, shape: &[usize]) -> Self {
        self.dataset.shape = shape.to_vec();
        self
    }

    pub fn use_hash(mut self, val: bool) -> Self {
        self.dataset.use_hash = val;
        self
    }

    pub fn build(self) -> DatasetConfig {
        self.dataset
    }
}

/// Task with no inputs and no params; the name alone fixes its identity.
pub fn task(name: &str) -> Task {
    Task::new(name, vec![], Params::new())
}

/// Task consuming the results of `producers`, in order.
pub fn task_on(name: &str, producers: &[&Task]) -> Task {
    let inputs = producers
        .iter()
        .map(|p| InputRef::Task(p.id().clone()))
        .collect();
    Task::new(name, inputs, Params::new())
}
