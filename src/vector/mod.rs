//! Vector primitives: dimensions, distance metrics and embedding providers.
//!
//! Everything here is independent of persistence. Stores in
//! [`crate::storage`] and the orchestrator in [`crate::index`] build on
//! these types.

mod embedding;
mod metric;
mod types;

#[cfg(test)]
pub use embedding::MockEmbeddingProvider;
pub use embedding::{
    EmbeddingProvider, FastEmbedProvider, StaticEmbeddingProvider, models_dir,
    parse_embedding_model,
};
pub use metric::{
    CosineSimilarity, DistanceMetric, DotProduct, EuclideanDistance, MetricKind, RankOrder,
};
pub use types::{VECTOR_DIMENSION_384, VectorDimension, VectorError};
