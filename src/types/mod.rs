//! Core data model: indexed items, items awaiting embedding, and search hits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String key/value metadata attached to an item (e.g. `source`).
///
/// Ordered so serialized sidecars and documents are deterministic.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key under which ingestion records the originating document.
pub const SOURCE_KEY: &str = "source";

/// One indexed chunk: its text, its embedding and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexItem {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl IndexItem {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            metadata,
        }
    }

    /// Returns the `source` metadata tag, if any.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// An item submitted to the index, optionally without an embedding.
///
/// When `embedding` is `None` the index asks its provider to encode `text`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewItem {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
}

impl NewItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn into_item(self, embedding: Vec<f32>) -> IndexItem {
        IndexItem {
            id: self.id,
            text: self.text,
            embedding,
            metadata: self.metadata,
        }
    }
}

/// A ranked search hit. Embeddings are never part of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Raw metric score; its direction depends on the metric.
    pub score: f32,
}
