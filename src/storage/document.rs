//! Single-document JSON store for small indexes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{
    LoadedIndex, StoreKind, VectorStore, batch_dimension, files_with_extension, index_file,
    remove_if_exists, validate_name, write_json_atomic,
};
use crate::error::{IndexError, IndexResult};
use crate::types::IndexItem;

const DOCUMENT_VERSION: u32 = 1;
pub const DOCUMENT_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    dimension: usize,
    items: Vec<IndexItem>,
}

/// Stores the whole item list, embeddings included, as `<name>.json`.
///
/// Loads parse everything eagerly.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStore;

impl JsonStore {
    pub fn new() -> Self {
        Self
    }
}

impl VectorStore for JsonStore {
    fn save_index(&self, items: &[IndexItem], dir: &Path, name: &str) -> IndexResult<PathBuf> {
        validate_name(name)?;
        let dimension = batch_dimension(items)?;

        fs::create_dir_all(dir).map_err(|e| IndexError::io("create directory", dir, e))?;
        let path = index_file(dir, name, DOCUMENT_EXTENSION);

        let document = IndexDocument {
            version: DOCUMENT_VERSION,
            dimension,
            items: items.to_vec(),
        };
        write_json_atomic(&path, &document)?;

        tracing::info!("Saved {} items to {}", items.len(), path.display());
        Ok(path)
    }

    fn load_index(&self, dir: &Path, name: &str) -> IndexResult<Option<LoadedIndex>> {
        validate_name(name)?;
        let path = index_file(dir, name, DOCUMENT_EXTENSION);
        if !path.is_file() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path).map_err(|e| IndexError::io("read index", &path, e))?;
        let document: IndexDocument =
            serde_json::from_str(&json).map_err(|e| IndexError::format(&path, e))?;

        if document.version > DOCUMENT_VERSION {
            return Err(IndexError::format(
                &path,
                format!(
                    "format version {} is newer than supported version {DOCUMENT_VERSION}",
                    document.version
                ),
            ));
        }
        if let Err(IndexError::DimensionMismatch { expected, actual }) =
            batch_dimension(&document.items)
        {
            return Err(IndexError::format(
                &path,
                format!("items disagree on dimension ({expected} vs {actual})"),
            ));
        }

        tracing::debug!("Loaded {} items from {}", document.items.len(), path.display());
        Ok(Some(LoadedIndex::Items(document.items)))
    }

    fn list_indexes(&self, dir: &Path) -> Vec<PathBuf> {
        files_with_extension(dir, DOCUMENT_EXTENSION)
    }

    fn remove_index(&self, dir: &Path, name: &str) -> IndexResult<bool> {
        validate_name(name)?;
        remove_if_exists(&index_file(dir, name, DOCUMENT_EXTENSION))
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Json
    }
}
