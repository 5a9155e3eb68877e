#![allow(dead_code)]

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simsearch::vector::{DotProduct, VectorDimension};
use simsearch::{
    DistanceMetric, EmbeddingProvider, IndexItem, Metadata, NewItem, SimilarityIndex, VectorStore,
};
use std::sync::Arc;

/// Hashes each lowercase word into one of `dimension` buckets and normalizes.
///
/// Texts sharing words score higher under dot product, which is enough to
/// exercise ranking end to end without a model download.
pub struct BagOfWordsProvider {
    dimension: usize,
}

impl BagOfWordsProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                    (h ^ u64::from(b)).wrapping_mul(0x100_0000_01b3)
                });
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsProvider {
    async fn encode(&self, text: &str) -> Option<Vec<f32>> {
        Some(self.embed(text))
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn native_dimension(&self) -> Option<VectorDimension> {
        VectorDimension::new(self.dimension).ok()
    }
}

pub fn index_with(
    store: Box<dyn VectorStore>,
    metric: Box<dyn DistanceMetric>,
    dimension: usize,
) -> SimilarityIndex {
    SimilarityIndex::new(
        "test",
        Arc::new(BagOfWordsProvider::new(dimension)),
        metric,
        store,
    )
}

pub fn dot_index(store: Box<dyn VectorStore>, dimension: usize) -> SimilarityIndex {
    index_with(store, Box::new(DotProduct), dimension)
}

pub fn vector_item(id: &str, embedding: Vec<f32>) -> NewItem {
    NewItem::new(id, format!("text of {id}"))
        .with_embedding(embedding)
        .with_metadata("n", id)
}

/// `count` items with seeded random vectors in [-1, 1).
pub fn random_items(count: usize, dimension: usize, seed: u64) -> Vec<IndexItem> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let embedding = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
            let mut metadata = Metadata::new();
            metadata.insert("position".to_string(), i.to_string());
            IndexItem::new(format!("item-{i}"), format!("random item {i}"), embedding, metadata)
        })
        .collect()
}

pub fn as_new_items(items: &[IndexItem]) -> Vec<NewItem> {
    items
        .iter()
        .map(|item| NewItem {
            id: item.id.clone(),
            text: item.text.clone(),
            metadata: item.metadata.clone(),
            embedding: Some(item.embedding.clone()),
        })
        .collect()
}

pub fn bits(vector: &[f32]) -> Vec<u32> {
    vector.iter().map(|v| v.to_bits()).collect()
}
