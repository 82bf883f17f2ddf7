// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::task::Params;
use crate::types::{CachePolicy, CacheStorageMode};

/// Analysis request exactly as read from a TOML file.
///
/// ```toml
/// [scheduler]
/// max_workers = 4
/// memory_ceiling_bytes = 8589934592
///
/// [cache]
/// budget_bytes = 268435456
///
/// [dataset.counts]
/// source = "data/counts.h5"
/// shape = [2730, 3451]
///
/// [analysis.pca]
/// inputs = ["counts"]
/// params = { n_comps = 50 }
///
/// [analysis.tsne]
/// inputs = ["pca"]
/// params = { perplexity = 30.0 }
/// ```
///
/// All sections except `[analysis.*]` are optional. Convert into an
/// [`AnalysisRequest`] (which validates) before use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAnalysisRequest {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub cache: CacheSection,

    /// Datasets from `[dataset.<name>]`.
    #[serde(default)]
    pub dataset: BTreeMap<String, DatasetConfig>,

    /// Analyses from `[analysis.<name>]`.
    #[serde(default)]
    pub analysis: BTreeMap<String, AnalysisConfig>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Worker pool size; defaults to the available parallelism.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Memory the run may use. Unlimited when absent.
    #[serde(default)]
    pub memory_ceiling_bytes: Option<u64>,

    /// Fraction of the ceiling kept free before dispatch is suspended.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    /// How often memory is re-checked while dispatch is suspended.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout for analyses that do not set `timeout_secs`.
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

fn default_safety_margin() -> f64 {
    0.10
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_workers: None,
            memory_ceiling_bytes: None,
            safety_margin: default_safety_margin(),
            poll_interval_ms: default_poll_interval_ms(),
            default_timeout_secs: None,
        }
    }
}

impl SchedulerSection {
    pub fn effective_max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn effective_memory_ceiling(&self) -> u64 {
        self.memory_ceiling_bytes.unwrap_or(u64::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Total size of cached results kept in memory.
    #[serde(default = "default_budget_bytes")]
    pub budget_bytes: u64,

    #[serde(default)]
    pub storage: CacheStorageMode,

    /// Directory used when `storage = "dir"`.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub policy: CachePolicy,
}

fn default_budget_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".anadag/cache")
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            budget_bytes: default_budget_bytes(),
            storage: CacheStorageMode::default(),
            dir: default_cache_dir(),
            policy: CachePolicy::default(),
        }
    }
}

/// `[dataset.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// Locator understood by the dataset loader (usually a path).
    pub source: String,

    /// Estimated in-memory size. Falls back to the file length when the
    /// source is a readable file, else 0.
    #[serde(default)]
    pub size_bytes: Option<u64>,

    #[serde(default)]
    pub shape: Vec<usize>,

    /// Identify the dataset by a hash of its contents rather than its
    /// locator, so cached results follow file changes.
    #[serde(default)]
    pub use_hash: bool,
}

/// `[analysis.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisConfig {
    /// Registered analysis to run; defaults to the section name.
    #[serde(default)]
    pub kind: Option<String>,

    /// Ordered inputs: names of datasets or other analyses.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Analyses that must finish first without feeding this one.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub params: Params,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl AnalysisConfig {
    pub fn effective_kind<'a>(&'a self, name: &'a str) -> &'a str {
        self.kind.as_deref().unwrap_or(name)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// A validated analysis request. Build through `TryFrom<RawAnalysisRequest>`
/// or [`load_and_validate`](crate::config::load_and_validate).
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub scheduler: SchedulerSection,
    pub cache: CacheSection,
    pub dataset: BTreeMap<String, DatasetConfig>,
    pub analysis: BTreeMap<String, AnalysisConfig>,
}

impl AnalysisRequest {
    pub(crate) fn new_unchecked(raw: RawAnalysisRequest) -> Self {
        Self {
            scheduler: raw.scheduler,
            cache: raw.cache,
            dataset: raw.dataset,
            analysis: raw.analysis,
        }
    }
}
