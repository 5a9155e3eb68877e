//! On-device semantic retrieval.
//!
//! Documents are split into token-bounded chunks, embedded by a pluggable
//! provider, ranked against queries with a configurable distance metric and
//! persisted either as a JSON document or as a memory-mapped vector file that
//! is searched without loading it into memory.

pub mod chunking;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod storage;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use chunking::{RecursiveTokenSplitter, TextSplitter, TokenSplitter, Tokenizer};
pub use config::Settings;
pub use error::{IndexError, IndexResult};
pub use index::{AddReport, IngestReport, SimilarityIndex};
pub use storage::{JsonStore, MemoryMappedStore, VectorStore};
pub use types::{IndexItem, Metadata, NewItem, SearchResult};
pub use vector::{DistanceMetric, EmbeddingProvider, MetricKind};
