//! Similarity index orchestration and document ingestion.

pub mod ingest;
mod similarity;

pub use ingest::{IngestReport, chunk_id, index_document, index_documents, index_file};
pub use similarity::{AddReport, DEFAULT_BATCH_SIZE, SimilarityIndex};
