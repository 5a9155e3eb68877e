//! The similarity index: embeds items, ranks them against queries and hands
//! persistence off to a pluggable store.
//!
//! Items live in two places. Anything added since the last load sits in an
//! in-memory list. A memory-mapped load leaves the loaded corpus on disk and
//! scores it straight from the mapping; removing one of those entries only
//! records a tombstone until the next save rewrites the files.
//!
//! Candidate order is stable: mapped entries first in stored order, then
//! in-memory items in insertion order. Equal scores keep that order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, IndexResult};
use crate::storage::{LoadedIndex, MappedEntry, MemoryMappedIndexContext, VectorStore};
use crate::types::{IndexItem, Metadata, NewItem, SearchResult};
use crate::vector::{DistanceMetric, EmbeddingProvider, VectorDimension};

/// Default number of texts sent to the provider per batch.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Outcome of an `add_items` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    /// Items recorded in the index.
    pub indexed: usize,
    /// Ids whose text the provider failed to encode.
    pub skipped: Vec<String>,
    /// True if the call stopped early on cancellation.
    pub cancelled: bool,
    /// Ids left unrecorded because the call was cancelled, in input order.
    pub pending: Vec<String>,
}

/// One scored candidate, borrowed from wherever it lives.
enum Candidate<'a> {
    Mapped(&'a MappedEntry),
    Memory(&'a IndexItem),
}

impl Candidate<'_> {
    fn into_result(self, score: f32) -> SearchResult {
        let (id, text, metadata) = match self {
            Self::Mapped(entry) => (&entry.id, &entry.text, &entry.metadata),
            Self::Memory(item) => (&item.id, &item.text, &item.metadata),
        };
        SearchResult {
            id: id.clone(),
            text: text.clone(),
            metadata: metadata.clone(),
            score,
        }
    }
}

/// Exhaustive similarity index over a single corpus.
///
/// The index is driven by one caller at a time and has no internal locking.
pub struct SimilarityIndex {
    name: String,
    /// 0 until the first non-empty vector is recorded. Only `clear` resets it.
    dimension: usize,
    items: Vec<IndexItem>,
    mapped: Option<MemoryMappedIndexContext>,
    /// Mapped entry ids removed since load.
    removed: HashSet<String>,
    provider: Arc<dyn EmbeddingProvider>,
    metric: Box<dyn DistanceMetric>,
    store: Box<dyn VectorStore>,
    batch_size: usize,
}

impl SimilarityIndex {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn EmbeddingProvider>,
        metric: Box<dyn DistanceMetric>,
        store: Box<dyn VectorStore>,
    ) -> Self {
        Self {
            name: name.into(),
            dimension: 0,
            items: Vec::new(),
            mapped: None,
            removed: HashSet::new(),
            provider,
            metric,
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vector length shared by every item, 0 while none is established.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> &dyn DistanceMetric {
        self.metric.as_ref()
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// In-memory items only. Mapped entries are not included.
    pub fn items(&self) -> &[IndexItem] {
        &self.items
    }

    pub fn is_memory_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// In-memory items plus live mapped entries.
    pub fn item_count(&self) -> usize {
        self.items.len() + self.live_mapped().count()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    fn live_mapped(&self) -> impl Iterator<Item = &MappedEntry> + '_ {
        self.mapped
            .iter()
            .flat_map(|context| context.entries())
            .filter(|entry| !self.removed.contains(&entry.id))
    }

    /// Returns true if `id` is held in memory or by a live mapped entry.
    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id) || self.live_mapped().any(|e| e.id == id)
    }

    /// Mapped entries that have not been removed since load.
    pub fn memory_mapped_entries(&self) -> Vec<&MappedEntry> {
        self.live_mapped().collect()
    }

    /// Copies out the live mapped entries accepted by `filter`.
    pub fn memory_mapped_items<F>(&self, filter: F) -> Vec<IndexItem>
    where
        F: Fn(&MappedEntry) -> bool,
    {
        let Some(context) = &self.mapped else {
            return Vec::new();
        };
        let wanted: Vec<MappedEntry> = self
            .live_mapped()
            .filter(|&entry| filter(entry))
            .cloned()
            .collect();
        context.make_items_for(&wanted)
    }

    /// Every live item as an owned copy, mapped entries first.
    pub fn all_items(&self) -> Vec<IndexItem> {
        let mut all = match &self.mapped {
            Some(context) => context.make_items(&self.removed),
            None => Vec::new(),
        };
        all.extend(self.items.iter().cloned());
        all
    }

    /// Pulls the mapped corpus into memory and drops the mapping.
    pub fn materialize(&mut self) {
        if self.mapped.is_none() {
            return;
        }
        let all = self.all_items();
        tracing::debug!("Materialized {} items from mapping", all.len());
        self.items = all;
        self.mapped = None;
        self.removed.clear();
    }

    /// Adds one item. Returns false if its text could not be encoded.
    pub async fn add_item(&mut self, item: NewItem) -> IndexResult<bool> {
        let report = self.add_items(vec![item]).await?;
        Ok(report.indexed == 1)
    }

    pub async fn add_items(&mut self, items: Vec<NewItem>) -> IndexResult<AddReport> {
        self.add_items_cancellable(items, &CancellationToken::new())
            .await
    }

    /// Adds a batch, encoding any item submitted without an embedding.
    ///
    /// Duplicate ids and dimension mismatches fail the whole call with the
    /// index unchanged. Items the provider cannot encode are skipped. On
    /// cancellation the items resolved so far are still recorded and the rest
    /// are listed in [`AddReport::pending`].
    pub async fn add_items_cancellable(
        &mut self,
        items: Vec<NewItem>,
        cancel: &CancellationToken,
    ) -> IndexResult<AddReport> {
        self.add_replacing(items, cancel, &HashSet::new()).await
    }

    /// Swaps every item whose metadata matches `predicate` for `items`.
    ///
    /// The new batch is validated against the index as it will look without
    /// the matched items, and the matched items are only removed once the
    /// batch is accepted. On error the index is unchanged. Returns how many
    /// items were replaced alongside the add report.
    pub async fn replace_where<F>(
        &mut self,
        predicate: F,
        items: Vec<NewItem>,
        cancel: &CancellationToken,
    ) -> IndexResult<(usize, AddReport)>
    where
        F: Fn(&Metadata) -> bool,
    {
        let mut replaced: HashSet<String> = self
            .items
            .iter()
            .filter(|item| predicate(&item.metadata))
            .map(|item| item.id.clone())
            .collect();
        replaced.extend(
            self.live_mapped()
                .filter(|entry| predicate(&entry.metadata))
                .map(|entry| entry.id.clone()),
        );

        let report = self.add_replacing(items, cancel, &replaced).await?;
        Ok((replaced.len(), report))
    }

    async fn add_replacing(
        &mut self,
        items: Vec<NewItem>,
        cancel: &CancellationToken,
        replaced: &HashSet<String>,
    ) -> IndexResult<AddReport> {
        self.check_unique(&items, replaced)?;

        let mut report = AddReport::default();
        let (resolved, pending) = self.resolve_embeddings(items, cancel).await;
        report.cancelled = !pending.is_empty();
        report.pending = pending;

        let mut accepted = Vec::with_capacity(resolved.len());
        for (item, embedding) in resolved {
            match embedding {
                Some(embedding) => accepted.push(item.into_item(embedding)),
                None => {
                    tracing::warn!("Skipping '{}': embedding failed", item.id);
                    report.skipped.push(item.id);
                }
            }
        }

        let dimension = self.batch_dimension(&accepted)?;
        report.indexed = accepted.len();
        self.dimension = dimension;
        if !replaced.is_empty() {
            self.items.retain(|item| !replaced.contains(&item.id));
            let tombstones: Vec<String> = self
                .live_mapped()
                .filter(|entry| replaced.contains(&entry.id))
                .map(|entry| entry.id.clone())
                .collect();
            self.removed.extend(tombstones);
        }
        self.items.extend(accepted);

        if report.cancelled {
            tracing::info!(
                "Add cancelled after {} items ({} skipped, {} pending)",
                report.indexed,
                report.skipped.len(),
                report.pending.len()
            );
        } else {
            tracing::debug!(
                "Added {} items ({} skipped)",
                report.indexed,
                report.skipped.len()
            );
        }
        Ok(report)
    }

    /// Rejects ids repeated within `items` or already held by an item outside
    /// `replaced`.
    fn check_unique(&self, items: &[NewItem], replaced: &HashSet<String>) -> IndexResult<()> {
        let mut seen: HashSet<&str> = self
            .items
            .iter()
            .map(|i| i.id.as_str())
            .chain(self.live_mapped().map(|e| e.id.as_str()))
            .filter(|id| !replaced.contains(*id))
            .collect();

        for item in items {
            if !seen.insert(item.id.as_str()) {
                return Err(IndexError::DuplicateId {
                    id: item.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Dimension the index will have once `batch` is recorded.
    fn batch_dimension(&self, batch: &[IndexItem]) -> IndexResult<usize> {
        let established = self.dimension > 0 || !self.is_empty();
        let expected = if established {
            self.dimension
        } else {
            batch
                .iter()
                .map(|item| item.embedding.len())
                .find(|len| *len > 0)
                .unwrap_or(0)
        };

        if let Some(bad) = batch.iter().find(|item| item.embedding.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: bad.embedding.len(),
            });
        }
        Ok(expected)
    }

    /// Pairs every item with its embedding, encoding where none was given.
    ///
    /// Output order matches input order. On cancellation only the items
    /// before the first unencoded one are returned, together with the ids of
    /// everything from that point on.
    async fn resolve_embeddings(
        &self,
        mut items: Vec<NewItem>,
        cancel: &CancellationToken,
    ) -> (Vec<(NewItem, Option<Vec<f32>>)>, Vec<String>) {
        let mut embeddings: Vec<Option<Vec<f32>>> =
            items.iter_mut().map(|item| item.embedding.take()).collect();
        let pending: Vec<usize> = embeddings
            .iter()
            .enumerate()
            .filter(|(_, embedding)| embedding.is_none())
            .map(|(i, _)| i)
            .collect();

        let encoded = self
            .encode_pending(&items, &pending, &mut embeddings, cancel)
            .await;
        let cancelled = encoded < pending.len();
        let cutoff = if cancelled {
            pending[encoded]
        } else {
            items.len()
        };

        let mut resolved: Vec<(NewItem, Option<Vec<f32>>)> =
            items.into_iter().zip(embeddings).collect();
        let pending = resolved
            .split_off(cutoff)
            .into_iter()
            .map(|(item, _)| item.id)
            .collect();
        (resolved, pending)
    }

    /// Encodes `items[i]` for every `i` in `pending`, preferring batches.
    /// Returns how many were attempted before cancellation.
    async fn encode_pending(
        &self,
        items: &[NewItem],
        pending: &[usize],
        embeddings: &mut [Option<Vec<f32>>],
        cancel: &CancellationToken,
    ) -> usize {
        if !self.provider.supports_batch() {
            return self.encode_each(items, pending, embeddings, cancel).await;
        }

        let mut done = 0;
        for batch in pending.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return done;
            }
            let texts: Vec<String> = batch.iter().map(|&i| items[i].text.clone()).collect();

            match self.provider.encode_batch(&texts).await {
                Some(vectors) if vectors.len() == batch.len() => {
                    for (&i, vector) in batch.iter().zip(vectors) {
                        embeddings[i] = vector;
                    }
                    done += batch.len();
                }
                _ => {
                    tracing::warn!(
                        "Batch encode of {} texts failed, falling back to single encodes",
                        batch.len()
                    );
                    let encoded = self.encode_each(items, batch, embeddings, cancel).await;
                    done += encoded;
                    if encoded < batch.len() {
                        return done;
                    }
                }
            }
        }
        done
    }

    /// Encodes one item at a time, checking for cancellation before each.
    async fn encode_each(
        &self,
        items: &[NewItem],
        indices: &[usize],
        embeddings: &mut [Option<Vec<f32>>],
        cancel: &CancellationToken,
    ) -> usize {
        for (n, &i) in indices.iter().enumerate() {
            if cancel.is_cancelled() {
                return n;
            }
            embeddings[i] = self.provider.encode(&items[i].text).await;
        }
        indices.len()
    }

    /// Removes the item with `id`. Returns false if it was not present.
    pub fn remove_item(&mut self, id: &str) -> bool {
        if let Some(pos) = self.items.iter().position(|item| item.id == id) {
            self.items.remove(pos);
            return true;
        }
        if self.live_mapped().any(|entry| entry.id == id) {
            self.removed.insert(id.to_string());
            return true;
        }
        false
    }

    /// Encodes `query` and returns the `k` best matches.
    pub async fn search(&self, query: &str, k: usize) -> IndexResult<Vec<SearchResult>> {
        let vector = self
            .provider
            .encode(query)
            .await
            .ok_or_else(|| IndexError::EncodingFailure {
                what: "query".to_string(),
            })?;
        self.search_vector(&vector, k)
    }

    /// Like [`search`](Self::search), keeping only results whose score passes
    /// `threshold` in the metric's direction.
    pub async fn search_with_threshold(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> IndexResult<Vec<SearchResult>> {
        let order = self.metric.order();
        let results = self.search(query, k).await?;
        Ok(results
            .into_iter()
            .filter(|result| order.passes(result.score, threshold))
            .collect())
    }

    /// Ranks every live item against `query` and returns the top `k`.
    pub fn search_vector(&self, query: &[f32], k: usize) -> IndexResult<Vec<SearchResult>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if let Ok(dimension) = VectorDimension::new(self.dimension) {
            dimension.validate_vector(query)?;
        }

        let mut scored: Vec<(f32, Candidate<'_>)> = Vec::with_capacity(self.item_count());
        if let Some(context) = &self.mapped {
            for (entry, vector) in context.embeddings() {
                if self.removed.contains(&entry.id) {
                    continue;
                }
                let score = self.metric.score(query, vector)?;
                scored.push((score, Candidate::Mapped(entry)));
            }
        }
        for item in &self.items {
            let score = self.metric.score(query, &item.embedding)?;
            scored.push((score, Candidate::Memory(item)));
        }

        let order = self.metric.order();
        scored.sort_by(|a, b| order.compare(a.0, b.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, candidate)| candidate.into_result(score))
            .collect())
    }

    /// Persists every live item to `dir` under `name`, or the index name.
    ///
    /// A mapped corpus is materialized first so the store can rewrite the
    /// files it was loaded from.
    pub fn save_index(&mut self, dir: &Path, name: Option<&str>) -> IndexResult<PathBuf> {
        let name = name.unwrap_or(&self.name).to_string();
        self.materialize();
        let path = self.store.save_index(&self.items, dir, &name)?;
        tracing::info!(
            "Saved index '{name}' ({} items, dimension {})",
            self.items.len(),
            self.dimension
        );
        Ok(path)
    }

    /// Replaces the index contents with the persisted index `name`.
    ///
    /// Returns false, leaving the index untouched, if nothing is persisted
    /// under that name.
    pub fn load_index(&mut self, dir: &Path, name: Option<&str>) -> IndexResult<bool> {
        let name = name.unwrap_or(&self.name).to_string();
        let Some(loaded) = self.store.load_index(dir, &name)? else {
            tracing::debug!("No index '{name}' under {}", dir.display());
            return Ok(false);
        };

        let count = loaded.len();
        match loaded {
            LoadedIndex::Items(items) => {
                self.dimension = crate::storage::batch_dimension(&items)?;
                self.items = items;
                self.mapped = None;
            }
            LoadedIndex::Mapped(context) => {
                self.dimension = context.dimension();
                self.items.clear();
                self.mapped = Some(context);
            }
        }
        self.removed.clear();

        tracing::info!(
            "Loaded index '{name}' ({count} items, dimension {}, mapped: {})",
            self.dimension,
            self.is_memory_mapped()
        );
        Ok(true)
    }

    /// Deletes the files persisted under `name`, or the index name, and
    /// empties the index.
    pub fn clear(&mut self, dir: &Path, name: Option<&str>) -> IndexResult<()> {
        let name = name.unwrap_or(&self.name).to_string();
        let removed = self.store.remove_index(dir, &name)?;
        self.reset();
        tracing::info!("Cleared index '{name}' (files removed: {removed})");
        Ok(())
    }

    fn reset(&mut self) {
        self.dimension = 0;
        self.items.clear();
        self.mapped = None;
        self.removed.clear();
    }

    /// Empties the index if its dimension disagrees with the provider's.
    ///
    /// Returns true if the index was cleared. Persisted files are untouched
    /// until the next save or `clear`.
    pub fn ensure_compatible(&mut self) -> bool {
        let Some(native) = self.provider.native_dimension() else {
            return false;
        };
        if self.dimension == 0 || self.dimension == native.get() {
            return false;
        }

        tracing::warn!(
            "Index '{}' has dimension {} but the embedding provider produces {}; discarding it",
            self.name,
            self.dimension,
            native
        );
        self.reset();
        true
    }
}
