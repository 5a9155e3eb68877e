//! Split, embed, index, persist and query documents end to end.

use std::sync::Arc;

use crate::common::BagOfWordsProvider;
use simsearch::chunking::{Chunk, WhitespaceTokenizer, reassemble};
use simsearch::index::{chunk_id, index_document, index_documents, index_file};
use simsearch::vector::DotProduct;
use simsearch::{
    IndexError, MemoryMappedStore, NewItem, RecursiveTokenSplitter, SimilarityIndex,
    TextSplitter, TokenSplitter, Tokenizer,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DIMENSION: usize = 512;

fn corpus() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "rust.txt",
            "Rust ownership and the borrow checker prevent data races at compile time.",
        ),
        (
            "garden.txt",
            "Tomatoes need full sun, steady watering and rich compost to ripen.",
        ),
        (
            "space.txt",
            "The rocket reached orbit after the second stage engine burned for six minutes.",
        ),
    ]
}

fn new_index() -> SimilarityIndex {
    SimilarityIndex::new(
        "docs",
        Arc::new(BagOfWordsProvider::new(DIMENSION)),
        Box::new(DotProduct),
        Box::new(MemoryMappedStore::new()),
    )
}

fn whitespace_splitter(chunk_size: usize, overlap: usize) -> RecursiveTokenSplitter {
    RecursiveTokenSplitter::new(Arc::new(WhitespaceTokenizer), chunk_size, overlap)
}

#[tokio::test]
async fn test_ingest_save_reload_and_search() {
    let temp_dir = TempDir::new().unwrap();
    let splitter = whitespace_splitter(64, 0);
    let cancel = CancellationToken::new();

    let mut index = new_index();
    let reports = index_documents(&mut index, corpus(), &splitter, &cancel)
        .await
        .unwrap();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.chunks == 1 && r.indexed == 1));

    let results = index.search("borrow checker ownership", 1).await.unwrap();
    assert_eq!(results[0].id, chunk_id("rust.txt", 0));
    assert_eq!(results[0].metadata["source"], "rust.txt");

    index.save_index(temp_dir.path(), None).unwrap();

    let mut reloaded = new_index();
    assert!(reloaded.load_index(temp_dir.path(), None).unwrap());
    assert!(reloaded.is_memory_mapped());
    assert_eq!(reloaded.item_count(), 3);

    let results = reloaded.search("watering tomatoes compost", 3).await.unwrap();
    assert_eq!(results[0].metadata["source"], "garden.txt");
    assert_eq!(
        results[0].text,
        "Tomatoes need full sun, steady watering and rich compost to ripen."
    );
}

#[tokio::test]
async fn test_reingest_replaces_previous_chunks() {
    let splitter = whitespace_splitter(4, 0);
    let cancel = CancellationToken::new();
    let mut index = new_index();

    index_document(&mut index, "other", "unrelated words here", &splitter, &cancel)
        .await
        .unwrap();
    let first = index_document(
        &mut index,
        "notes",
        "one two three four five six seven eight nine ten",
        &splitter,
        &cancel,
    )
    .await
    .unwrap();
    assert!(first.chunks > 1);
    assert_eq!(first.indexed, first.chunks);
    assert_eq!(first.replaced, 0);

    let second = index_document(&mut index, "notes", "short text", &splitter, &cancel)
        .await
        .unwrap();
    assert_eq!(second.replaced, first.indexed);
    assert_eq!(second.chunks, 1);
    assert!(index.contains("notes-chunk-0"));
    assert!(!index.contains("notes-chunk-1"));
    assert!(index.contains("other-chunk-0"));
    assert_eq!(index.item_count(), 2);
}

#[tokio::test]
async fn test_reingest_over_mapped_index_tombstones_old_chunks() {
    let temp_dir = TempDir::new().unwrap();
    let splitter = whitespace_splitter(64, 0);
    let cancel = CancellationToken::new();

    let mut index = new_index();
    index_documents(&mut index, corpus(), &splitter, &cancel)
        .await
        .unwrap();
    index.save_index(temp_dir.path(), None).unwrap();
    index.load_index(temp_dir.path(), None).unwrap();

    let report = index_document(
        &mut index,
        "space.txt",
        "The lander touched down softly on the icy moon.",
        &splitter,
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(report.replaced, 1);
    assert_eq!(index.item_count(), 3);

    let results = index.search("lander touched moon", 3).await.unwrap();
    assert_eq!(results[0].text, "The lander touched down softly on the icy moon.");

    index.save_index(temp_dir.path(), None).unwrap();
    let mut reloaded = new_index();
    reloaded.load_index(temp_dir.path(), None).unwrap();
    let texts: Vec<String> = reloaded.all_items().into_iter().map(|i| i.text).collect();
    assert!(!texts.iter().any(|t| t.contains("rocket")));
    assert!(texts.iter().any(|t| t.contains("lander")));
}

#[tokio::test]
async fn test_rejected_reingest_keeps_mapped_chunks() {
    let temp_dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let mut index = new_index();
    index_documents(&mut index, corpus(), &whitespace_splitter(64, 0), &cancel)
        .await
        .unwrap();
    index.save_index(temp_dir.path(), None).unwrap();
    index.load_index(temp_dir.path(), None).unwrap();
    index
        .add_item(NewItem::new("rust.txt-chunk-1", "pinned note").with_metadata("source", "manual"))
        .await
        .unwrap();

    let result = index_document(
        &mut index,
        "rust.txt",
        "alpha beta gamma delta epsilon zeta eta theta",
        &whitespace_splitter(4, 0),
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(IndexError::DuplicateId { .. })));

    assert_eq!(index.item_count(), 4);
    assert!(index.contains(&chunk_id("rust.txt", 0)));
    let results = index.search("borrow checker ownership", 1).await.unwrap();
    assert_eq!(results[0].id, chunk_id("rust.txt", 0));
}

#[tokio::test]
async fn test_cancelled_before_start_indexes_nothing() {
    let splitter = whitespace_splitter(64, 0);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut index = new_index();
    let reports = index_documents(&mut index, corpus(), &splitter, &cancel)
        .await
        .unwrap();
    assert!(reports.is_empty());
    assert!(index.is_empty());
}

#[tokio::test]
async fn test_index_file_uses_path_as_source() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("note.txt");
    std::fs::write(&path, "A small note about lighthouses and fog.").unwrap();

    let mut index = new_index();
    let report = index_file(
        &mut index,
        &path,
        &whitespace_splitter(64, 0),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let source = path.display().to_string();
    assert_eq!(report.source, source);
    assert!(index.contains(&chunk_id(&source, 0)));

    let missing = index_file(
        &mut index,
        &temp_dir.path().join("missing.txt"),
        &whitespace_splitter(64, 0),
        &CancellationToken::new(),
    )
    .await;
    assert!(missing.is_err());
}

fn long_document() -> String {
    let mut doc = String::new();
    for p in 0..5 {
        for s in 0..6 {
            doc.push_str(&format!(
                "Section {p} line {s} describes   something\tworth indexing. "
            ));
        }
        doc.push_str("\n\n");
    }
    doc.push_str("Trailingwordwithoutanybreaksatallbecauseitisonelongtoken end");
    doc
}

fn assert_chunks_cover(chunks: &[Chunk], text: &str, chunk_size: usize) {
    let tokenizer = WhitespaceTokenizer;
    assert!(chunks.len() > 1);
    assert_eq!(reassemble(chunks), text);
    for chunk in chunks {
        assert!(
            tokenizer.count_tokens(&chunk.text) <= chunk_size,
            "chunk over budget: {:?}",
            chunk.text
        );
        assert_eq!(&text[chunk.range.clone()], chunk.text);
    }
    for pair in chunks.windows(2) {
        assert_eq!(pair[0].range.end, pair[1].range.start + pair[1].overlap);
    }
}

#[test]
fn test_splitters_reassemble_with_overlap() {
    let text = long_document();
    for (chunk_size, overlap) in [(8, 0), (8, 3), (20, 5), (3, 2)] {
        let recursive: Box<dyn TextSplitter> =
            Box::new(whitespace_splitter(chunk_size, overlap));
        let token: Box<dyn TextSplitter> = Box::new(TokenSplitter::new(
            Arc::new(WhitespaceTokenizer),
            chunk_size,
            overlap,
        ));

        for splitter in [recursive, token] {
            let chunks = splitter.chunks(&text);
            assert_chunks_cover(&chunks, &text, chunk_size);
        }
    }
}

#[test]
fn test_blank_input_produces_no_chunks() {
    let splitter = whitespace_splitter(8, 2);
    assert!(splitter.split("").is_empty());
    assert!(splitter.split(" \n\n\t ").is_empty());
}
