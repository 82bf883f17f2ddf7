// src/dataset.rs

//! Dataset descriptors and the loader seam.
//!
//! A [`DatasetHandle`] is an immutable description of a table living on disk
//! or in memory. Materialising it is delegated to a [`DatasetLoader`]; the
//! orchestrator itself only needs identities and size estimates.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use blake3::Hasher;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identity of a dataset as seen by task identities.
///
/// Either the source locator itself, or `blake3:<hex>` for content-addressed
/// handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(locator: impl Into<String>) -> Self {
        DatasetId(locator.into())
    }

    fn content(hash_hex: &str) -> Self {
        DatasetId(format!("blake3:{hash_hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable dataset descriptor: identity, source locator, estimated size
/// and shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    id: DatasetId,
    locator: String,
    size_estimate: u64,
    shape: Vec<usize>,
}

impl DatasetHandle {
    /// Handle identified by its locator.
    pub fn new(locator: impl Into<String>, size_estimate: u64, shape: Vec<usize>) -> Self {
        let locator = locator.into();
        Self {
            id: DatasetId::new(locator.clone()),
            locator,
            size_estimate,
            shape,
        }
    }

    /// Handle identified by the contents of the file at `path`.
    ///
    /// Results computed from this dataset are invalidated whenever the file
    /// changes. If `size_estimate` is `None`, the file length is used.
    pub fn content_addressed(
        path: &Path,
        size_estimate: Option<u64>,
        shape: Vec<usize>,
    ) -> Result<Self> {
        let hash = compute_file_hash(path)?;
        let size_estimate = match size_estimate {
            Some(size) => size,
            None => file_len(path)?,
        };

        Ok(Self {
            id: DatasetId::content(&hash),
            locator: path.to_string_lossy().into_owned(),
            size_estimate,
            shape,
        })
    }

    pub fn id(&self) -> &DatasetId {
        &self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Estimated in-memory footprint once loaded.
    pub fn byte_size_estimate(&self) -> u64 {
        self.size_estimate
    }
}

/// In-memory table: named rows and columns over row-major values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub row_names: Vec<String>,
    pub col_names: Vec<String>,
    pub values: Vec<f64>,
}

impl Table {
    pub fn new(row_names: Vec<String>, col_names: Vec<String>, values: Vec<f64>) -> Result<Self> {
        if row_names.len() * col_names.len() != values.len() {
            bail!(
                "table shape {}x{} does not match {} values",
                row_names.len(),
                col_names.len(),
                values.len()
            );
        }
        Ok(Self {
            row_names,
            col_names,
            values,
        })
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.row_names.len(), self.col_names.len())
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        let cols = self.col_names.len();
        let start = index.checked_mul(cols)?;
        self.values.get(start..start + cols)
    }

    pub fn byte_size(&self) -> u64 {
        (self.values.len() * std::mem::size_of::<f64>()) as u64
    }
}

/// Materialises dataset handles into tables.
///
/// Format support (hierarchical stores, spreadsheets, ...) lives in
/// implementations outside this crate.
pub trait DatasetLoader: Send + Sync {
    fn load(&self, handle: &DatasetHandle) -> Result<Arc<Table>>;
}

/// Loader backed by tables registered ahead of time, keyed by locator.
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, table: Table) {
        self.tables.write().insert(locator.into(), Arc::new(table));
    }

    /// Build a handle for a registered table, sized from its contents.
    pub fn handle(&self, locator: &str) -> Option<DatasetHandle> {
        let tables = self.tables.read();
        let table = tables.get(locator)?;
        let (rows, cols) = table.shape();
        Some(DatasetHandle::new(locator, table.byte_size(), vec![rows, cols]))
    }
}

impl DatasetLoader for InMemoryLoader {
    fn load(&self, handle: &DatasetHandle) -> Result<Arc<Table>> {
        let tables = self.tables.read();
        match tables.get(handle.locator()) {
            Some(table) => {
                debug!(locator = %handle.locator(), "loaded in-memory table");
                Ok(Arc::clone(table))
            }
            None => bail!("no in-memory table registered for '{}'", handle.locator()),
        }
    }
}

/// Compute the blake3 hash of a single file.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Size of the file at `path` in bytes.
pub fn file_len(path: &Path) -> Result<u64> {
    let meta =
        std::fs::metadata(path).with_context(|| format!("reading metadata of {:?}", path))?;
    Ok(meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn content_addressed_handle_tracks_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a,b\n1,2\n").unwrap();

        let first = DatasetHandle::content_addressed(file.path(), None, vec![1, 2]).unwrap();
        assert!(first.id().as_str().starts_with("blake3:"));
        assert_eq!(first.byte_size_estimate(), 8);

        write!(file, "3,4\n").unwrap();
        let second = DatasetHandle::content_addressed(file.path(), Some(1024), vec![2, 2]).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(second.byte_size_estimate(), 1024);
    }

    #[test]
    fn in_memory_loader_returns_registered_tables() {
        let loader = InMemoryLoader::new();
        let table = Table::new(
            vec!["c1".into(), "c2".into()],
            vec!["g1".into()],
            vec![0.5, 1.5],
        )
        .unwrap();
        loader.insert("counts", table.clone());

        let handle = loader.handle("counts").unwrap();
        assert_eq!(handle.shape(), &[2, 1]);
        assert_eq!(handle.byte_size_estimate(), 16);
        assert_eq!(*loader.load(&handle).unwrap(), table);

        let missing = DatasetHandle::new("missing", 0, vec![]);
        assert!(loader.load(&missing).is_err());
    }

    #[test]
    fn table_rejects_mismatched_shape() {
        assert!(Table::new(vec!["r".into()], vec!["a".into(), "b".into()], vec![1.0]).is_err());
    }
}
