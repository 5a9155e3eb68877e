//! Memory-mapped vector store.
//!
//! # Storage Format
//!
//! Each index `name` is two files:
//! - `<name>.mmdat`: every item's embedding as little-endian `f32`, in save
//!   order, with no header and no padding
//! - `<name>.mmmeta`: JSON sidecar holding the format version, the dimension,
//!   the data file name and the ordered entries
//!
//! The data file is written and flushed before the sidecar, and the previous
//! sidecar is removed before either is touched. A crash mid-save leaves no
//! sidecar at all rather than one that points at partial data.

#[cfg(target_endian = "big")]
compile_error!("the memory-mapped store reads little-endian f32 data in place");

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use serde::{Deserialize, Serialize};

use super::context::{MappedEntry, MemoryMappedIndexContext};
use super::{
    LoadedIndex, StoreKind, VectorStore, batch_dimension, files_with_extension, index_file,
    remove_if_exists, validate_name, write_atomic, write_json_atomic,
};
use crate::error::{IndexError, IndexResult};
use crate::types::IndexItem;

/// Current sidecar format version.
const FORMAT_VERSION: u32 = 1;

pub const METADATA_EXTENSION: &str = "mmmeta";
pub const DATA_EXTENSION: &str = "mmdat";

#[derive(Debug, Serialize, Deserialize)]
struct SidecarFile {
    version: u32,
    dimension: usize,
    items: Vec<MappedEntry>,
    embeddings_file_name: String,
}

/// Store that keeps vectors on disk and reads them through a mapping.
#[derive(Debug, Clone, Default)]
pub struct MemoryMappedStore {
    materialize_on_load: bool,
}

impl MemoryMappedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, loads copy every vector into memory instead of returning a
    /// mapped context.
    #[must_use]
    pub fn materialize_on_load(mut self, enabled: bool) -> Self {
        self.materialize_on_load = enabled;
        self
    }

    /// Opens the sidecar at `sidecar_path` and maps its data file.
    pub fn load_context(&self, sidecar_path: &Path) -> IndexResult<MemoryMappedIndexContext> {
        let sidecar = read_sidecar(sidecar_path)?;

        if sidecar.version > FORMAT_VERSION {
            return Err(IndexError::format(
                sidecar_path,
                format!(
                    "format version {} is newer than supported version {FORMAT_VERSION}",
                    sidecar.version
                ),
            ));
        }

        let file_name = Path::new(&sidecar.embeddings_file_name);
        if file_name.file_name() != Some(file_name.as_os_str()) {
            return Err(IndexError::format(
                sidecar_path,
                format!("invalid data file name '{}'", sidecar.embeddings_file_name),
            ));
        }
        let data_path = sidecar_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(file_name);

        let file = match File::open(&data_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::integrity(&data_path, "data file is missing"));
            }
            Err(e) => return Err(IndexError::io("open data file", &data_path, e)),
        };
        let len = file
            .metadata()
            .map_err(|e| IndexError::io("stat data file", &data_path, e))?
            .len();

        let data = if len == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and never outlives the context
            // that owns it. Concurrent writers to the file are unsupported.
            let mmap = unsafe { MmapOptions::new().map(&file) }
                .map_err(|e| IndexError::io("map data file", &data_path, e))?;
            Some(mmap)
        };

        let context = MemoryMappedIndexContext::new(
            sidecar.items,
            sidecar.dimension,
            sidecar.version,
            data,
            data_path,
        )?;

        tracing::debug!(
            "Mapped {} entries (dimension {}) from {}",
            context.len(),
            context.dimension(),
            sidecar_path.display()
        );
        Ok(context)
    }
}

fn read_sidecar(path: &Path) -> IndexResult<SidecarFile> {
    let json = fs::read_to_string(path).map_err(|e| IndexError::io("read sidecar", path, e))?;
    serde_json::from_str(&json).map_err(|e| IndexError::format(path, e))
}

impl VectorStore for MemoryMappedStore {
    fn save_index(&self, items: &[IndexItem], dir: &Path, name: &str) -> IndexResult<PathBuf> {
        validate_name(name)?;
        let dimension = batch_dimension(items)?;

        fs::create_dir_all(dir).map_err(|e| IndexError::io("create directory", dir, e))?;
        let sidecar_path = index_file(dir, name, METADATA_EXTENSION);
        let data_path = index_file(dir, name, DATA_EXTENSION);

        remove_if_exists(&sidecar_path)?;
        remove_if_exists(&data_path)?;

        let mut entries = Vec::with_capacity(items.len());
        let mut offset = 0usize;
        write_atomic(&data_path, |w| {
            for item in items {
                entries.push(MappedEntry {
                    id: item.id.clone(),
                    text: item.text.clone(),
                    metadata: item.metadata.clone(),
                    embedding_index: offset,
                });
                for value in &item.embedding {
                    w.write_all(&value.to_le_bytes())?;
                }
                offset += item.embedding.len();
            }
            Ok(())
        })?;

        let embeddings_file_name = format!("{name}.{DATA_EXTENSION}");
        let sidecar = SidecarFile {
            version: FORMAT_VERSION,
            dimension,
            items: entries,
            embeddings_file_name,
        };
        write_json_atomic(&sidecar_path, &sidecar)?;

        tracing::info!(
            "Saved {} items ({offset} floats) to {}",
            items.len(),
            sidecar_path.display()
        );
        Ok(sidecar_path)
    }

    fn load_index(&self, dir: &Path, name: &str) -> IndexResult<Option<LoadedIndex>> {
        validate_name(name)?;
        let sidecar_path = index_file(dir, name, METADATA_EXTENSION);
        if !sidecar_path.is_file() {
            return Ok(None);
        }

        let context = self.load_context(&sidecar_path)?;
        if self.materialize_on_load {
            let items = context.make_items(&Default::default());
            return Ok(Some(LoadedIndex::Items(items)));
        }
        Ok(Some(LoadedIndex::Mapped(context)))
    }

    fn list_indexes(&self, dir: &Path) -> Vec<PathBuf> {
        files_with_extension(dir, METADATA_EXTENSION)
    }

    fn remove_index(&self, dir: &Path, name: &str) -> IndexResult<bool> {
        validate_name(name)?;
        let sidecar_path = index_file(dir, name, METADATA_EXTENSION);

        // The sidecar names its data file; fall back to the default name if
        // it is unreadable.
        let data_path = read_sidecar(&sidecar_path)
            .ok()
            .map(|sidecar| dir.join(sidecar.embeddings_file_name))
            .filter(|path| path.parent() == Some(dir))
            .unwrap_or_else(|| index_file(dir, name, DATA_EXTENSION));

        let removed_sidecar = remove_if_exists(&sidecar_path)?;
        let removed_data = remove_if_exists(&data_path)?;
        Ok(removed_sidecar || removed_data)
    }

    fn kind(&self) -> StoreKind {
        StoreKind::MemoryMapped
    }
}
