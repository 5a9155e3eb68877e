//! Document ingestion: split a document into chunks and index them under its
//! source name.
//!
//! Re-ingesting a source replaces its previous chunks. Chunk ids are
//! `"{source}-chunk-{n}"` and every chunk carries `{"source": source}`.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use super::similarity::SimilarityIndex;
use crate::chunking::TextSplitter;
use crate::error::{IndexError, IndexResult};
use crate::types::{NewItem, SOURCE_KEY};

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub source: String,
    /// Chunks the splitter produced.
    pub chunks: usize,
    /// Chunks recorded in the index.
    pub indexed: usize,
    /// Chunks skipped because encoding failed.
    pub skipped: usize,
    /// Previous chunks of this source that were replaced.
    pub replaced: usize,
    pub cancelled: bool,
    /// Chunks left unindexed because ingestion was cancelled.
    pub pending: usize,
}

pub fn chunk_id(source: &str, n: usize) -> String {
    format!("{source}-chunk-{n}")
}

/// Splits `text` and indexes its chunks under `source`, replacing any chunks
/// previously indexed for the same source.
///
/// The previous chunks are only dropped once the new ones are accepted, so a
/// failed re-ingest leaves the document as it was. Cancellation is checked
/// between chunks. Chunks indexed before it fires stay in the index.
pub async fn index_document(
    index: &mut SimilarityIndex,
    source: &str,
    text: &str,
    splitter: &dyn TextSplitter,
    cancel: &CancellationToken,
) -> IndexResult<IngestReport> {
    let chunks = splitter.split(text);
    let items: Vec<NewItem> = chunks
        .into_iter()
        .enumerate()
        .map(|(n, chunk)| NewItem::new(chunk_id(source, n), chunk).with_metadata(SOURCE_KEY, source))
        .collect();
    let chunk_count = items.len();

    let (replaced, added) = index
        .replace_where(
            |metadata| metadata.get(SOURCE_KEY).is_some_and(|s| s == source),
            items,
            cancel,
        )
        .await?;

    let report = IngestReport {
        source: source.to_string(),
        chunks: chunk_count,
        indexed: added.indexed,
        skipped: added.skipped.len(),
        replaced,
        cancelled: added.cancelled,
        pending: added.pending.len(),
    };
    tracing::info!(
        "Indexed '{source}': {}/{} chunks ({} skipped, {} pending, {replaced} replaced)",
        report.indexed,
        report.chunks,
        report.skipped,
        report.pending
    );
    Ok(report)
}

/// Ingests `(source, text)` pairs in order, checking for cancellation
/// between documents.
pub async fn index_documents<I, S, T>(
    index: &mut SimilarityIndex,
    documents: I,
    splitter: &dyn TextSplitter,
    cancel: &CancellationToken,
) -> IndexResult<Vec<IngestReport>>
where
    I: IntoIterator<Item = (S, T)>,
    S: AsRef<str>,
    T: AsRef<str>,
{
    let mut reports = Vec::new();
    for (source, text) in documents {
        if cancel.is_cancelled() {
            tracing::info!("Ingestion cancelled after {} documents", reports.len());
            break;
        }
        let report =
            index_document(index, source.as_ref(), text.as_ref(), splitter, cancel).await?;
        let stop = report.cancelled;
        reports.push(report);
        if stop {
            break;
        }
    }
    Ok(reports)
}

/// Reads a UTF-8 text file and ingests it with its path as the source.
pub async fn index_file(
    index: &mut SimilarityIndex,
    path: &Path,
    splitter: &dyn TextSplitter,
    cancel: &CancellationToken,
) -> IndexResult<IngestReport> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| IndexError::io("read document", path, e))?;
    let source = path.display().to_string();
    index_document(index, &source, &text, splitter, cancel).await
}
