//! Persistence strategies for similarity indexes.
//!
//! Two interchangeable stores implement [`VectorStore`]:
//! - [`MemoryMappedStore`]: raw little-endian `f32` data file plus a JSON
//!   sidecar. Loads hand back a [`MemoryMappedIndexContext`] that reads
//!   vectors straight from the mapping.
//! - [`JsonStore`]: one JSON document per index, parsed eagerly. Meant for
//!   small corpora.
//!
//! Index files live directly in the directory passed to each call, named
//! after the index (`<name>.<ext>`).

mod context;
mod document;
mod mmap;

pub use context::{MappedEntry, MemoryMappedIndexContext};
pub use document::JsonStore;
pub use mmap::MemoryMappedStore;

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{IndexError, IndexResult};
use crate::types::IndexItem;

/// What a store returns from a successful load.
pub enum LoadedIndex {
    /// Fully materialized items, ready for the in-memory list.
    Items(Vec<IndexItem>),
    /// A read-only mapping that stays on disk.
    Mapped(MemoryMappedIndexContext),
}

impl LoadedIndex {
    pub fn len(&self) -> usize {
        match self {
            Self::Items(items) => items.len(),
            Self::Mapped(context) => context.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Save/load contract shared by every persistence strategy.
pub trait VectorStore: Send + Sync {
    /// Persists `items` as index `name` under `dir`, returning the path of
    /// the primary index file.
    fn save_index(&self, items: &[IndexItem], dir: &Path, name: &str) -> IndexResult<PathBuf>;

    /// Loads index `name` from `dir`. `Ok(None)` when no such index exists.
    fn load_index(&self, dir: &Path, name: &str) -> IndexResult<Option<LoadedIndex>>;

    /// Primary index files under `dir`, sorted. Empty if `dir` is unreadable.
    fn list_indexes(&self, dir: &Path) -> Vec<PathBuf>;

    /// Deletes index `name` from `dir`. Returns false if nothing was there.
    fn remove_index(&self, dir: &Path, name: &str) -> IndexResult<bool>;

    fn kind(&self) -> StoreKind;
}

/// Configurable store selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Json,
    #[default]
    MemoryMapped,
}

impl StoreKind {
    /// Builds the store this kind names.
    ///
    /// `materialize_on_load` only affects the memory-mapped store.
    pub fn build(self, materialize_on_load: bool) -> Box<dyn VectorStore> {
        match self {
            Self::Json => Box::new(JsonStore::new()),
            Self::MemoryMapped => {
                Box::new(MemoryMappedStore::new().materialize_on_load(materialize_on_load))
            }
        }
    }
}

/// Dimension shared by every item in a batch about to be saved.
///
/// The first non-empty vector sets it. Any other length, including an empty
/// vector once the dimension is set, is a mismatch. All-empty batches have
/// dimension 0.
pub(crate) fn batch_dimension(items: &[IndexItem]) -> IndexResult<usize> {
    let dimension = items
        .iter()
        .map(|item| item.embedding.len())
        .find(|len| *len > 0)
        .unwrap_or(0);

    if let Some(bad) = items.iter().find(|item| item.embedding.len() != dimension) {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: bad.embedding.len(),
        });
    }
    Ok(dimension)
}

/// Rejects names that would escape the index directory.
pub(crate) fn validate_name(name: &str) -> IndexResult<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(IndexError::ConfigError {
            reason: format!("invalid index name '{name}'"),
        });
    }
    Ok(())
}

pub(crate) fn index_file(dir: &Path, name: &str, extension: &str) -> PathBuf {
    dir.join(format!("{name}.{extension}"))
}

/// Sorted files under `dir` with the given extension.
pub(crate) fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == extension))
        .collect();
    files.sort();
    files
}

pub(crate) fn remove_if_exists(path: &Path) -> IndexResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(IndexError::io("remove", path, e)),
    }
}

/// Writes `path` through a temporary file in the same directory so readers
/// never observe a partial file.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> IndexResult<()>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| IndexError::io("create", dir, e))?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer).map_err(|e| IndexError::io("write", path, e))?;
        writer.flush().map_err(|e| IndexError::io("flush", path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| IndexError::io("sync", path, e))?;
    tmp.persist(path)
        .map_err(|e| IndexError::io("persist", path, e.error))?;
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> IndexResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| IndexError::format(path, e))?;
    write_atomic(path, |w| w.write_all(&json))
}
