//! Embedding provider capability and its implementations.
//!
//! The similarity index never runs a model itself. It holds an
//! `Arc<dyn EmbeddingProvider>` and awaits `encode`/`encode_batch`, so model
//! inference can run on a blocking pool (fastembed) or behind any other
//! runtime without the index knowing.
//!
//! A provider signals failure by returning `None`: the caller decides whether
//! a missing vector is fatal (a query) or skippable (one chunk of a batch).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::vector::{VectorDimension, VectorError};

/// Capability for turning text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Encodes one text. Returns `None` if the model failed.
    async fn encode(&self, text: &str) -> Option<Vec<f32>>;

    /// Encodes a batch as one unit of work.
    ///
    /// Returns `None` when the batch as a whole failed; the caller then falls
    /// back to per-item [`encode`](Self::encode). On success the result has
    /// one slot per input, in input order.
    async fn encode_batch(&self, texts: &[String]) -> Option<Vec<Option<Vec<f32>>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.encode(text).await);
        }
        Some(out)
    }

    /// Whether `encode_batch` is a real batched call worth preferring.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Output dimension of the underlying model, if known up front.
    fn native_dimension(&self) -> Option<VectorDimension>;
}

/// Parses a fastembed model name as written in settings.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "MxbaiEmbedLargeV1" => Ok(EmbeddingModel::MxbaiEmbedLargeV1),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => Err(VectorError::EmbeddingFailed(format!(
            "Unknown embedding model '{other}'. Supported: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MxbaiEmbedLargeV1, MultilingualE5Small"
        ))),
    }
}

/// Default on-disk cache for downloaded models.
#[must_use]
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("simsearch")
        .join("models")
}

/// Local embedding provider backed by fastembed (ONNX runtime).
///
/// Inference is CPU-bound, so every call hops onto tokio's blocking pool.
/// The model sits behind a mutex because fastembed needs `&mut` access.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    dimension: VectorDimension,
    batch_size: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model", &"<TextEmbedding>")
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Loads `model`, downloading it into `cache_dir` on first use.
    ///
    /// The output dimension is measured from a test embedding.
    ///
    /// # Errors
    /// Returns an error if the model fails to initialize or download.
    pub fn new(
        model: EmbeddingModel,
        cache_dir: Option<PathBuf>,
        batch_size: usize,
        show_progress: bool,
    ) -> Result<Self, VectorError> {
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir.unwrap_or_else(models_dir))
                .with_show_download_progress(show_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        let sample = text_model
            .embed(vec!["test"], None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;
        let dimension = sample
            .into_iter()
            .next()
            .map(|v| v.len())
            .unwrap_or_default();
        let dimension = VectorDimension::new(dimension)?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_model)),
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    fn embed_blocking(
        model: &Mutex<TextEmbedding>,
        texts: Vec<String>,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, VectorError> {
        model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(texts, Some(batch_size))
            .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}")))
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, VectorError> {
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || Self::embed_blocking(&model, texts, batch_size))
            .await
            .map_err(|e| VectorError::EmbeddingFailed(format!("Embedding task panicked: {e}")))?
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn encode(&self, text: &str) -> Option<Vec<f32>> {
        match self.run(vec![text.to_string()]).await {
            Ok(embeddings) => embeddings.into_iter().next(),
            Err(e) => {
                tracing::warn!("{e}");
                None
            }
        }
    }

    async fn encode_batch(&self, texts: &[String]) -> Option<Vec<Option<Vec<f32>>>> {
        if texts.is_empty() {
            return Some(Vec::new());
        }
        match self.run(texts.to_vec()).await {
            Ok(embeddings) if embeddings.len() == texts.len() => {
                Some(embeddings.into_iter().map(Some).collect())
            }
            Ok(embeddings) => {
                tracing::warn!(
                    "Batch returned {} embeddings for {} inputs",
                    embeddings.len(),
                    texts.len()
                );
                None
            }
            Err(e) => {
                tracing::warn!("{e}");
                None
            }
        }
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn native_dimension(&self) -> Option<VectorDimension> {
        Some(self.dimension)
    }
}

/// Provider that serves precomputed vectors keyed by exact text.
///
/// Useful when embeddings are produced elsewhere (or in tests) and the index
/// only needs to look them up. Unknown texts encode to `None`.
#[derive(Debug, Default, Clone)]
pub struct StaticEmbeddingProvider {
    vectors: std::collections::HashMap<String, Vec<f32>>,
    dimension: Option<VectorDimension>,
}

impl StaticEmbeddingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the vector returned for `text`.
    #[must_use]
    pub fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        if self.dimension.is_none() {
            self.dimension = VectorDimension::new(vector.len()).ok();
        }
        self.vectors.insert(text.into(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbeddingProvider {
    async fn encode(&self, text: &str) -> Option<Vec<f32>> {
        self.vectors.get(text).cloned()
    }

    fn native_dimension(&self) -> Option<VectorDimension> {
        self.dimension
    }
}

/// Mock embedding provider for testing.
///
/// Generates deterministic unit-length embeddings from text content and can
/// be told to fail for particular texts or for whole batches.
#[cfg(test)]
pub struct MockEmbeddingProvider {
    dimension: VectorDimension,
    fail_on: Vec<String>,
    fail_batches: bool,
    batch_calls: std::sync::atomic::AtomicUsize,
    cancel_after: Option<(tokio_util::sync::CancellationToken, usize)>,
    encodes: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockEmbeddingProvider {
    /// Create a generator with custom dimension for testing.
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).unwrap(),
            fail_on: Vec::new(),
            fail_batches: false,
            batch_calls: std::sync::atomic::AtomicUsize::new(0),
            cancel_after: None,
            encodes: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Any text containing `needle` encodes to `None`.
    #[must_use]
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }

    /// Every `encode_batch` call fails as a whole.
    #[must_use]
    pub fn failing_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    /// Cancels `token` once `count` single encodes have run.
    #[must_use]
    pub fn cancelling_after(
        mut self,
        token: tokio_util::sync::CancellationToken,
        count: usize,
    ) -> Self {
        self.cancel_after = Some((token, count));
        self
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if self.fail_on.iter().any(|needle| text.contains(needle.as_str())) {
            return None;
        }
        let dim = self.dimension.get();
        let mut embedding = vec![0.1; dim];
        for (i, byte) in text.bytes().enumerate() {
            embedding[(i + byte as usize) % dim] += f32::from(byte) / 255.0;
        }

        // Normalize to unit length (like real embeddings)
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }
        Some(embedding)
    }
}

#[cfg(test)]
#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn encode(&self, text: &str) -> Option<Vec<f32>> {
        tokio::task::yield_now().await;
        let done = self
            .encodes
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        if let Some((token, count)) = &self.cancel_after {
            if done >= *count {
                token.cancel();
            }
        }
        self.embed(text)
    }

    async fn encode_batch(&self, texts: &[String]) -> Option<Vec<Option<Vec<f32>>>> {
        self.batch_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail_batches {
            return None;
        }
        Some(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn native_dimension(&self) -> Option<VectorDimension> {
        Some(self.dimension)
    }
}
