//! Read-only view over a loaded memory-mapped index.
//!
//! The data file is mapped once and never written through. Every vector
//! access goes through [`MemoryMappedIndexContext::vector_at`], which hands
//! out a bounds-checked `&[f32]` borrowed from the mapping.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};
use crate::types::{IndexItem, Metadata};

const BYTES_PER_F32: usize = 4;

/// Sidecar record for one item. `embedding_index` is an element offset
/// into the data file, not a byte offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedEntry {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub embedding_index: usize,
}

/// Loaded memory-mapped index: sidecar entries plus the mapped vectors.
///
/// The mapping is immutable for the lifetime of the context, so it is safe to
/// share across threads. Another process rewriting the same files while the
/// context is alive is undefined behaviour and must be prevented by the
/// caller.
#[derive(Debug)]
pub struct MemoryMappedIndexContext {
    entries: Vec<MappedEntry>,
    dimension: usize,
    version: u32,
    /// `None` when the data file is empty.
    data: Option<Mmap>,
    data_path: PathBuf,
}

impl MemoryMappedIndexContext {
    /// Wraps a mapping after checking that every entry lies inside it.
    pub(crate) fn new(
        entries: Vec<MappedEntry>,
        dimension: usize,
        version: u32,
        data: Option<Mmap>,
        data_path: PathBuf,
    ) -> IndexResult<Self> {
        let context = Self {
            entries,
            dimension,
            version,
            data,
            data_path,
        };
        context.verify()?;
        Ok(context)
    }

    fn verify(&self) -> IndexResult<()> {
        let bytes = self.data.as_deref().unwrap_or(&[]);
        if bytes.len() % BYTES_PER_F32 != 0 {
            return Err(IndexError::integrity(
                &self.data_path,
                format!("data length {} is not a multiple of 4", bytes.len()),
            ));
        }

        // SAFETY: every bit pattern is a valid f32; only the aligned middle
        // is ever used.
        let (head, floats, tail) = unsafe { bytes.align_to::<f32>() };
        if !head.is_empty() || !tail.is_empty() {
            return Err(IndexError::integrity(
                &self.data_path,
                "mapped data is not aligned for f32 access",
            ));
        }

        if self.dimension == 0 {
            return Ok(());
        }

        for entry in &self.entries {
            let end = entry.embedding_index.checked_add(self.dimension);
            if end.is_none_or(|end| end > floats.len()) {
                return Err(IndexError::integrity(
                    &self.data_path,
                    format!(
                        "entry '{}' at offset {} with dimension {} exceeds {} stored floats",
                        entry.id,
                        entry.embedding_index,
                        self.dimension,
                        floats.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn floats(&self) -> &[f32] {
        let bytes = self.data.as_deref().unwrap_or(&[]);
        // SAFETY: alignment and length were checked in `verify`, any bit
        // pattern is a valid f32, and the mapping is read-only.
        let (_, floats, _) = unsafe { bytes.align_to::<f32>() };
        floats
    }

    pub fn entries(&self) -> &[MappedEntry] {
        &self.entries
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Zero-copy view of the vector starting at `embedding_index`.
    ///
    /// Returns an empty slice when the index has dimension 0, and `None` when
    /// the range falls outside the mapping.
    pub fn vector_at(&self, embedding_index: usize) -> Option<&[f32]> {
        if self.dimension == 0 {
            return Some(&[][..]);
        }
        let end = embedding_index.checked_add(self.dimension)?;
        self.floats().get(embedding_index..end)
    }

    /// Iterates entries with borrowed views into the mapped vectors.
    pub fn embeddings(&self) -> impl Iterator<Item = (&MappedEntry, &[f32])> + '_ {
        self.entries.iter().filter_map(|entry| {
            self.vector_at(entry.embedding_index)
                .map(|vector| (entry, vector))
        })
    }

    /// Calls `visit` with each entry not in `excluding` and its mapped vector.
    /// Nothing is copied.
    pub fn enumerate_embeddings<F>(&self, excluding: &HashSet<String>, mut visit: F)
    where
        F: FnMut(&MappedEntry, &[f32]),
    {
        for (entry, vector) in self.embeddings() {
            if !excluding.contains(&entry.id) {
                visit(entry, vector);
            }
        }
    }

    /// Copies every entry not in `excluding` out into owned items.
    pub fn make_items(&self, excluding: &HashSet<String>) -> Vec<IndexItem> {
        let mut items = Vec::with_capacity(self.entries.len().saturating_sub(excluding.len()));
        self.enumerate_embeddings(excluding, |entry, vector| {
            items.push(to_item(entry, vector));
        });
        items
    }

    /// Copies out the given entries, in stored order.
    pub fn make_items_for(&self, entries: &[MappedEntry]) -> Vec<IndexItem> {
        if entries.is_empty() {
            return Vec::new();
        }
        let wanted: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        self.embeddings()
            .filter(|(entry, _)| wanted.contains(entry.id.as_str()))
            .map(|(entry, vector)| to_item(entry, vector))
            .collect()
    }
}

fn to_item(entry: &MappedEntry, vector: &[f32]) -> IndexItem {
    IndexItem::new(
        entry.id.clone(),
        entry.text.clone(),
        vector.to_vec(),
        entry.metadata.clone(),
    )
}
