// src/cache/mod.rs

//! Content-addressed result cache.
//!
//! - [`ResultCache`]: in-memory LRU under a byte budget with a per-identity
//!   compute barrier.
//! - [`CacheStore`]: optional persistence consulted on memory misses
//!   ([`DirStore`], [`MemoryStore`]).

pub mod result_cache;
pub mod store;

use std::sync::Arc;

use tracing::info;

use crate::config::model::CacheSection;
use crate::errors::Result;
use crate::types::CacheStorageMode;

pub use result_cache::{CacheEntry, CacheStats, ResultCache};
pub use store::{CacheStore, DirStore, MemoryStore, StoredEntry};

/// Build the cache described by a `[cache]` section.
pub fn from_section(section: &CacheSection) -> Result<ResultCache> {
    let cache = ResultCache::new(section.budget_bytes).with_policy(section.policy);

    let cache = match section.storage {
        CacheStorageMode::Memory => cache,
        CacheStorageMode::Dir => {
            let store = DirStore::open(&section.dir)?;
            info!(dir = ?section.dir, "persisting results to cache directory");
            cache.with_store(Arc::new(store))
        }
    };

    Ok(cache)
}
