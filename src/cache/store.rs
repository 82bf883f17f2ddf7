// src/cache/store.rs

//! Persistence for cached results.
//!
//! A [`DirStore`] keeps one entry per task identity:
//!
//! `<dir>/<hash>.json`       the result value
//! `<dir>/<hash>.meta.json`  `{"size": <bytes>, "created": <unix secs>}`

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::task::TaskId;

/// Metadata of one persisted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEntry {
    pub id: TaskId,
    /// Serialized size of the value in bytes.
    pub size: u64,
    /// Unix seconds at which the entry was written.
    pub created: u64,
}

/// Abstract storage for cached results.
pub trait CacheStore: Send + Sync {
    fn load(&self, id: &TaskId) -> Result<Option<Value>>;
    fn save(&self, id: &TaskId, value: &Value) -> Result<()>;
    /// Returns whether an entry was removed.
    fn remove(&self, id: &TaskId) -> Result<bool>;
    /// All entries, oldest first.
    fn list(&self) -> Result<Vec<StoredEntry>>;

    /// Remove every entry; returns how many were removed.
    fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.list()? {
            if self.remove(&entry.id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove the oldest entries until the total size fits in `budget_bytes`.
    fn prune_to_budget(&self, budget_bytes: u64) -> Result<Vec<TaskId>> {
        let entries = self.list()?;
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        let mut removed = Vec::new();

        for entry in entries {
            if total <= budget_bytes {
                break;
            }
            if self.remove(&entry.id)? {
                total = total.saturating_sub(entry.size);
                removed.push(entry.id);
            }
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), budget_bytes, "pruned cache store");
        }
        Ok(removed)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn sort_oldest_first(entries: &mut [StoredEntry]) {
    entries.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    size: u64,
    created: u64,
}

const BLOB_SUFFIX: &str = ".json";
const META_SUFFIX: &str = ".meta.json";

/// Stores results as JSON files in a directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    /// Open (creating if needed) the store at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating cache directory at {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}{}", id, BLOB_SUFFIX))
    }

    fn meta_path(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}{}", id, META_SUFFIX))
    }

    fn read_meta(&self, id: &TaskId) -> Result<Meta> {
        let path = self.meta_path(id);
        match File::open(&path) {
            Ok(file) => serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parsing cache metadata at {:?}", path)),
            // Sidecar lost: fall back to the blob itself.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let meta = fs::metadata(self.blob_path(id))?;
                let created = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                Ok(Meta {
                    size: meta.len(),
                    created,
                })
            }
            Err(e) => Err(e).with_context(|| format!("opening cache metadata at {:?}", path)),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("creating cache file at {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("removing cache file at {:?}", path)),
    }
}

impl CacheStore for DirStore {
    fn load(&self, id: &TaskId) -> Result<Option<Value>> {
        let path = self.blob_path(id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("opening cache file at {:?}", path));
            }
        };
        let value = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing cache file at {:?}", path))?;
        debug!(id = %id.short(), "loaded result from cache directory");
        Ok(Some(value))
    }

    fn save(&self, id: &TaskId, value: &Value) -> Result<()> {
        let size = serde_json::to_vec(value)?.len() as u64;
        write_json(&self.blob_path(id), value)?;
        write_json(
            &self.meta_path(id),
            &Meta {
                size,
                created: now_secs(),
            },
        )?;
        debug!(id = %id.short(), size, "stored result in cache directory");
        Ok(())
    }

    fn remove(&self, id: &TaskId) -> Result<bool> {
        let blob = remove_if_exists(&self.blob_path(id))?;
        let meta = remove_if_exists(&self.meta_path(id))?;
        Ok(blob || meta)
    }

    fn list(&self) -> Result<Vec<StoredEntry>> {
        let mut entries = Vec::new();
        let read_dir = fs::read_dir(&self.dir)
            .with_context(|| format!("listing cache directory {:?}", self.dir))?;

        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(META_SUFFIX) {
                continue;
            }
            let Some(id) = name.strip_suffix(BLOB_SUFFIX).and_then(TaskId::parse) else {
                continue;
            };
            let meta = self.read_meta(&id)?;
            entries.push(StoredEntry {
                id,
                size: meta.size,
                created: meta.created,
            });
        }

        sort_oldest_first(&mut entries);
        Ok(entries)
    }
}

/// Keeps persisted entries in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<TaskId, (Value, StoredEntry)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, id: &TaskId) -> Result<Option<Value>> {
        Ok(self.entries.lock().get(id).map(|(v, _)| v.clone()))
    }

    fn save(&self, id: &TaskId, value: &Value) -> Result<()> {
        let entry = StoredEntry {
            id: id.clone(),
            size: serde_json::to_vec(value)?.len() as u64,
            created: now_secs(),
        };
        self.entries.lock().insert(id.clone(), (value.clone(), entry));
        Ok(())
    }

    fn remove(&self, id: &TaskId) -> Result<bool> {
        Ok(self.entries.lock().remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<StoredEntry>> {
        let mut entries: Vec<StoredEntry> =
            self.entries.lock().values().map(|(_, e)| e.clone()).collect();
        sort_oldest_first(&mut entries);
        Ok(entries)
    }
}
