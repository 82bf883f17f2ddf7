use serde::Deserialize;

/// Where computed results are kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStorageMode {
    /// Results live in memory only (lost on exit).
    Memory,
    /// Results are also written to a directory (`[cache].dir`).
    Dir,
}

impl Default for CacheStorageMode {
    fn default() -> Self {
        CacheStorageMode::Memory
    }
}

/// How the result cache is consulted.
///
/// - `ReadWrite`: return cached results, store new ones (default).
/// - `Refresh`: always recompute, then overwrite the cached result.
/// - `Disabled`: never read or write the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    ReadWrite,
    Refresh,
    Disabled,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::ReadWrite
    }
}
