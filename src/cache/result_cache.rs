// src/cache/result_cache.rs

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::store::CacheStore;
use crate::errors::{SharedError, panic_message};
use crate::task::{Task, TaskId};
use crate::types::CachePolicy;

/// Outcome shared by every caller waiting on one computation.
type Shared = Result<Arc<Value>, SharedError>;

/// Compute-barrier for one identity.
type Slot = Arc<OnceLock<Shared>>;

/// A cached result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: TaskId,
    pub value: Arc<Value>,
    /// Serialized JSON size; what the budget is measured in.
    pub size: u64,
    pub created: SystemTime,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<TaskId, CacheEntry>,
    in_flight: HashMap<TaskId, Slot>,
    total_bytes: u64,
    clock: u64,
}

impl CacheState {
    fn touch(&mut self, id: &TaskId) -> Option<Arc<Value>> {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.get_mut(id)?;
        entry.last_used = clock;
        Some(Arc::clone(&entry.value))
    }

    fn remove(&mut self, id: &TaskId) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.total_bytes -= entry.size;
        Some(entry)
    }

    fn least_recently_used(&self) -> Option<TaskId> {
        self.entries
            .values()
            .min_by_key(|e| e.last_used)
            .map(|e| e.id.clone())
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Times a compute function actually ran.
    pub computations: u64,
    pub evictions: u64,
    /// Bytes currently held in memory.
    pub bytes: u64,
    pub entries: usize,
}

/// Content-addressed, byte-budgeted result cache.
///
/// - Keys are task identities; a hit never runs the compute function.
/// - At most one computation per identity runs at a time: concurrent
///   callers wait on the same barrier and receive the same `Arc`.
/// - Failed computations, panics included, are shared with the waiting
///   callers but never stored.
/// - Entries are evicted least recently used first once the total
///   serialized size would exceed the budget. A value larger than the whole
///   budget is returned without being stored.
pub struct ResultCache {
    state: Mutex<CacheState>,
    budget_bytes: u64,
    policy: CachePolicy,
    store: Option<Arc<dyn CacheStore>>,
    counters: Counters,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("budget_bytes", &self.budget_bytes)
            .field("policy", &self.policy)
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            budget_bytes,
            policy: CachePolicy::default(),
            store: None,
            counters: Counters::default(),
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Consult `store` on a memory miss and write new results through to it.
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Return the cached result for `task`, or run `compute` once and cache
    /// its result.
    pub fn get_or_compute<F>(&self, task: &Task, compute: F) -> Result<Arc<Value>, SharedError>
    where
        F: FnOnce() -> anyhow::Result<Value>,
    {
        let id = task.id();

        if self.policy == CachePolicy::Disabled {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            self.counters.computations.fetch_add(1, Ordering::Relaxed);
            return run_compute(compute);
        }

        let slot = {
            let mut state = self.state.lock();
            if self.policy == CachePolicy::ReadWrite {
                if let Some(value) = state.touch(id) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(task = %task.analysis(), id = %id.short(), "cache hit");
                    return Ok(value);
                }
            }
            Arc::clone(
                state
                    .in_flight
                    .entry(id.clone())
                    .or_insert_with(|| Arc::new(OnceLock::new())),
            )
        };

        let mut initialised_here = false;
        let outcome = slot.get_or_init(|| {
            initialised_here = true;
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            let outcome = self.load_or_compute(task, compute);

            // Publish and release the barrier under one lock, so a later
            // caller either sees the entry or waits on this slot.
            let mut state = self.state.lock();
            if let Ok(value) = &outcome {
                self.insert_locked(&mut state, id, Arc::clone(value));
            }
            if state
                .in_flight
                .get(id)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                state.in_flight.remove(id);
            }
            outcome
        });

        if !initialised_here {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(task = %task.analysis(), id = %id.short(), "joined in-flight computation");
        }
        outcome.clone()
    }

    fn load_or_compute<F>(&self, task: &Task, compute: F) -> Shared
    where
        F: FnOnce() -> anyhow::Result<Value>,
    {
        let id = task.id();

        if self.policy == CachePolicy::ReadWrite {
            if let Some(store) = &self.store {
                match store.load(id) {
                    Ok(Some(value)) => {
                        debug!(task = %task.analysis(), id = %id.short(), "restored result from store");
                        return Ok(Arc::new(value));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(id = %id.short(), error = %e, "cache store read failed; recomputing")
                    }
                }
            }
        }

        debug!(task = %task.analysis(), id = %id.short(), "computing result");
        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        let value = run_compute(compute)?;

        if let Some(store) = &self.store {
            if let Err(e) = store.save(id, &value) {
                warn!(id = %id.short(), error = %e, "cache store write failed");
            }
        }
        Ok(value)
    }

    fn insert_locked(&self, state: &mut CacheState, id: &TaskId, value: Arc<Value>) {
        let size = match serde_json::to_vec(value.as_ref()) {
            Ok(bytes) => bytes.len() as u64,
            Err(e) => {
                warn!(id = %id.short(), error = %e, "result is not serializable; not cached");
                return;
            }
        };

        state.remove(id);

        if size > self.budget_bytes {
            debug!(id = %id.short(), size, budget = self.budget_bytes, "result exceeds cache budget; not cached");
            return;
        }

        while state.total_bytes + size > self.budget_bytes {
            let Some(victim) = state.least_recently_used() else {
                break;
            };
            if let Some(evicted) = state.remove(&victim) {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(id = %evicted.id.short(), size = evicted.size, "evicted cache entry");
            }
        }

        state.clock += 1;
        let entry = CacheEntry {
            id: id.clone(),
            value,
            size,
            created: SystemTime::now(),
            last_used: state.clock,
        };
        state.total_bytes += size;
        state.entries.insert(id.clone(), entry);
    }

    /// Cached value for `id`, refreshing its recency.
    pub fn get(&self, id: &TaskId) -> Option<Arc<Value>> {
        self.state.lock().touch(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// Drop the in-memory entry and any persisted copy of it.
    pub fn invalidate(&self, id: &TaskId) -> bool {
        let removed = self.state.lock().remove(id).is_some();
        let persisted = match &self.store {
            Some(store) => store.remove(id).unwrap_or_else(|e| {
                warn!(id = %id.short(), error = %e, "cache store remove failed");
                false
            }),
            None => false,
        };
        removed || persisted
    }

    /// Drop every in-memory entry. Persisted entries are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let (bytes, entries) = {
            let state = self.state.lock();
            (state.total_bytes, state.entries.len())
        };
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            bytes,
            entries,
        }
    }
}

/// Run `compute`, turning a panic into an error so the barrier is always
/// released with an outcome.
fn run_compute<F>(compute: F) -> Shared
where
    F: FnOnce() -> anyhow::Result<Value>,
{
    match panic::catch_unwind(AssertUnwindSafe(compute)) {
        Ok(result) => result.map(Arc::new).map_err(Arc::new),
        Err(payload) => Err(Arc::new(anyhow::anyhow!(
            "computation panicked: {}",
            panic_message(payload)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::task::Params;
    use serde_json::json;

    fn task(name: &str) -> Task {
        Task::new(name, Vec::new(), Params::new())
    }

    /// A JSON string value whose serialized form is exactly `bytes` long.
    fn sized(bytes: usize) -> Value {
        Value::String("x".repeat(bytes - 2))
    }

    #[test]
    fn hit_does_not_recompute() {
        let cache = ResultCache::new(1024);
        let t = task("a");

        let first = cache.get_or_compute(&t, || Ok(json!(1))).unwrap();
        let second = cache
            .get_or_compute(&t, || panic!("must not recompute"))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.computations), (1, 1, 1));
    }

    #[test]
    fn budget_evicts_least_recently_used() {
        let cache = ResultCache::new(100);
        let (a, b) = (task("a"), task("b"));

        cache.get_or_compute(&a, || Ok(sized(60))).unwrap();
        cache.get_or_compute(&b, || Ok(sized(60))).unwrap();

        assert!(!cache.contains(a.id()));
        assert!(cache.contains(b.id()));
        assert_eq!(cache.total_bytes(), 60);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn recency_protects_recently_read_entries() {
        let cache = ResultCache::new(100);
        let (a, b, c) = (task("a"), task("b"), task("c"));

        cache.get_or_compute(&a, || Ok(sized(40))).unwrap();
        cache.get_or_compute(&b, || Ok(sized(40))).unwrap();
        cache.get(a.id());
        cache.get_or_compute(&c, || Ok(sized(40))).unwrap();

        assert!(cache.contains(a.id()));
        assert!(!cache.contains(b.id()));
        assert!(cache.contains(c.id()));
    }

    #[test]
    fn oversized_value_is_returned_but_not_stored() {
        let cache = ResultCache::new(10);
        let t = task("big");
        let value = cache.get_or_compute(&t, || Ok(sized(50))).unwrap();

        assert_eq!(*value, sized(50));
        assert!(cache.is_empty());
    }

    #[test]
    fn errors_are_not_cached() {
        let cache = ResultCache::new(1024);
        let t = task("flaky");

        let err = cache
            .get_or_compute(&t, || Err(anyhow::anyhow!("boom")))
            .unwrap_err();
        assert!(err.to_string().contains("boom"));

        let ok = cache.get_or_compute(&t, || Ok(json!("fine"))).unwrap();
        assert_eq!(*ok, json!("fine"));
        assert_eq!(cache.stats().computations, 2);
    }

    #[test]
    fn panicking_compute_becomes_an_error_and_releases_the_slot() {
        let cache = ResultCache::new(1024);
        let t = task("explodes");

        let err = cache
            .get_or_compute(&t, || panic!("index out of bounds"))
            .unwrap_err();
        assert!(err.to_string().contains("index out of bounds"));
        assert!(cache.state.lock().in_flight.is_empty());

        let ok = cache.get_or_compute(&t, || Ok(json!(3))).unwrap();
        assert_eq!(*ok, json!(3));
    }

    #[test]
    fn refresh_policy_recomputes_and_overwrites() {
        let store = Arc::new(MemoryStore::new());
        let t = task("a");
        store.save(t.id(), &json!("stale")).unwrap();

        let cache = ResultCache::new(1024)
            .with_policy(CachePolicy::Refresh)
            .with_store(store.clone());
        let value = cache.get_or_compute(&t, || Ok(json!("fresh"))).unwrap();

        assert_eq!(*value, json!("fresh"));
        assert_eq!(store.load(t.id()).unwrap(), Some(json!("fresh")));
    }

    #[test]
    fn memory_miss_falls_back_to_store() {
        let store = Arc::new(MemoryStore::new());
        let t = task("a");
        store.save(t.id(), &json!([1, 2])).unwrap();

        let cache = ResultCache::new(1024).with_store(store);
        let value = cache
            .get_or_compute(&t, || panic!("stored result must be reused"))
            .unwrap();

        assert_eq!(*value, json!([1, 2]));
        assert_eq!(cache.stats().computations, 0);
    }

    #[test]
    fn disabled_policy_always_computes() {
        let cache = ResultCache::new(1024).with_policy(CachePolicy::Disabled);
        let t = task("a");
        cache.get_or_compute(&t, || Ok(json!(1))).unwrap();
        cache.get_or_compute(&t, || Ok(json!(1))).unwrap();

        assert_eq!(cache.stats().computations, 2);
        assert!(cache.is_empty());
    }
}
