//! Save/load behaviour of both stores, driven through the index.

use std::collections::HashSet;
use std::fs;

use crate::common::{as_new_items, bits, dot_index, random_items, vector_item};
use simsearch::storage::{LoadedIndex, MemoryMappedStore, StoreKind};
use simsearch::{IndexError, JsonStore, VectorStore};
use tempfile::TempDir;

fn stores() -> Vec<Box<dyn VectorStore>> {
    vec![
        Box::new(JsonStore::new()) as Box<dyn VectorStore>,
        Box::new(MemoryMappedStore::new()),
    ]
}

#[tokio::test]
async fn test_save_load_round_trip_is_bit_exact() {
    let items = random_items(64, 12, 3);

    for store in stores() {
        let kind = store.kind();
        let temp_dir = TempDir::new().unwrap();
        let mut index = dot_index(store, 12);
        index.add_items(as_new_items(&items)).await.unwrap();
        index.save_index(temp_dir.path(), Some("corpus")).unwrap();

        let mut reloaded = dot_index(kind.build(false), 12);
        assert!(reloaded.load_index(temp_dir.path(), Some("corpus")).unwrap());
        assert_eq!(reloaded.dimension(), 12);

        let loaded = reloaded.all_items();
        assert_eq!(loaded.len(), items.len(), "{kind:?}");
        for (saved, restored) in items.iter().zip(&loaded) {
            assert_eq!(saved.id, restored.id);
            assert_eq!(saved.text, restored.text);
            assert_eq!(saved.metadata, restored.metadata);
            assert_eq!(bits(&saved.embedding), bits(&restored.embedding), "{kind:?}");
        }
    }
}

#[tokio::test]
async fn test_thousand_items_stream_from_mapping() {
    let temp_dir = TempDir::new().unwrap();
    let items = random_items(1000, 32, 42);
    let store = MemoryMappedStore::new();
    let sidecar = store.save_index(&items, temp_dir.path(), "big").unwrap();

    let context = store.load_context(&sidecar).unwrap();
    assert_eq!(context.len(), 1000);
    assert_eq!(context.dimension(), 32);

    let mut seen = 0;
    for (position, (entry, vector)) in context.embeddings().enumerate() {
        assert_eq!(entry.id, items[position].id);
        assert_eq!(entry.embedding_index, position * 32);
        assert_eq!(bits(vector), bits(&items[position].embedding));
        seen += 1;
    }
    assert_eq!(seen, 1000);

    // the same data is searchable straight from the mapping
    let mut index = dot_index(Box::new(MemoryMappedStore::new()), 32);
    index.load_index(temp_dir.path(), Some("big")).unwrap();
    assert!(index.is_memory_mapped());
    assert!(index.items().is_empty());
    let results = index.search_vector(&items[500].embedding, 1).unwrap();
    assert_eq!(results[0].id, "item-500");
}

#[tokio::test]
async fn test_mapped_and_memory_items_rank_together() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = dot_index(Box::new(MemoryMappedStore::new()), 2);
    index
        .add_items(vec![
            vector_item("saved-weak", vec![0.1, 0.0]),
            vector_item("saved-strong", vec![0.9, 0.0]),
        ])
        .await
        .unwrap();
    index.save_index(temp_dir.path(), None).unwrap();
    index.load_index(temp_dir.path(), None).unwrap();

    index
        .add_item(vector_item("fresh", vec![0.5, 0.0]))
        .await
        .unwrap();
    let results = index.search_vector(&[1.0, 0.0], 3).unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["saved-strong", "fresh", "saved-weak"]);
}

#[tokio::test]
async fn test_duplicate_of_mapped_entry_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = dot_index(Box::new(MemoryMappedStore::new()), 2);
    index
        .add_item(vector_item("a", vec![1.0, 0.0]))
        .await
        .unwrap();
    index.save_index(temp_dir.path(), None).unwrap();
    index.load_index(temp_dir.path(), None).unwrap();

    let result = index.add_item(vector_item("a", vec![0.0, 1.0])).await;
    assert!(matches!(result, Err(IndexError::DuplicateId { .. })));
}

#[test]
fn test_truncated_data_file_fails_integrity() {
    let temp_dir = TempDir::new().unwrap();
    let store = MemoryMappedStore::new();
    store
        .save_index(&random_items(10, 8, 5), temp_dir.path(), "cut")
        .unwrap();

    let data_path = temp_dir.path().join("cut.mmdat");
    let data = fs::read(&data_path).unwrap();
    fs::write(&data_path, &data[..data.len() / 2]).unwrap();

    let mut index = dot_index(Box::new(MemoryMappedStore::new()), 8);
    let result = index.load_index(temp_dir.path(), Some("cut"));
    assert!(matches!(result, Err(IndexError::Integrity { .. })));
    // failed load leaves the index untouched
    assert!(index.is_empty());
}

#[test]
fn test_sidecar_without_data_file_fails_integrity() {
    let temp_dir = TempDir::new().unwrap();
    let store = MemoryMappedStore::new();
    store
        .save_index(&random_items(2, 4, 5), temp_dir.path(), "orphan")
        .unwrap();
    fs::remove_file(temp_dir.path().join("orphan.mmdat")).unwrap();

    let result = store.load_index(temp_dir.path(), "orphan");
    assert!(matches!(result, Err(IndexError::Integrity { .. })));
}

#[test]
fn test_missing_index_is_not_an_error() {
    let temp_dir = TempDir::new().unwrap();
    for store in stores() {
        let mut index = dot_index(store, 4);
        assert!(!index.load_index(temp_dir.path(), Some("nope")).unwrap());
        assert!(index.store().list_indexes(temp_dir.path()).is_empty());
    }
    let missing = temp_dir.path().join("does-not-exist");
    assert!(MemoryMappedStore::new().list_indexes(&missing).is_empty());
}

#[test]
fn test_listing_filters_by_sidecar_extension() {
    let temp_dir = TempDir::new().unwrap();
    let items = random_items(3, 4, 9);
    let mmap = MemoryMappedStore::new();
    mmap.save_index(&items, temp_dir.path(), "alpha").unwrap();
    mmap.save_index(&items, temp_dir.path(), "beta").unwrap();
    JsonStore::new()
        .save_index(&items, temp_dir.path(), "gamma")
        .unwrap();

    let names: Vec<String> = mmap
        .list_indexes(temp_dir.path())
        .iter()
        .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    let json_listed = JsonStore::new().list_indexes(temp_dir.path());
    assert_eq!(json_listed, vec![temp_dir.path().join("gamma.json")]);
}

#[tokio::test]
async fn test_clear_deletes_files_and_resets_dimension() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = dot_index(Box::new(MemoryMappedStore::new()), 4);
    index
        .add_item(vector_item("a", vec![1.0, 0.0, 0.0, 0.0]))
        .await
        .unwrap();
    index.save_index(temp_dir.path(), None).unwrap();
    assert!(temp_dir.path().join("test.mmdat").exists());

    index.clear(temp_dir.path(), None).unwrap();
    assert!(index.is_empty());
    assert_eq!(index.dimension(), 0);
    assert!(!temp_dir.path().join("test.mmmeta").exists());
    assert!(!temp_dir.path().join("test.mmdat").exists());
}

#[tokio::test]
async fn test_resave_after_removal_rewrites_files() {
    let temp_dir = TempDir::new().unwrap();
    let items = random_items(20, 6, 11);
    let mut index = dot_index(Box::new(MemoryMappedStore::new()), 6);
    index.add_items(as_new_items(&items)).await.unwrap();
    index.save_index(temp_dir.path(), None).unwrap();

    index.load_index(temp_dir.path(), None).unwrap();
    for i in (0..20).step_by(2) {
        assert!(index.remove_item(&format!("item-{i}")));
    }
    index.save_index(temp_dir.path(), None).unwrap();

    let store = MemoryMappedStore::new();
    let Some(LoadedIndex::Mapped(context)) = store.load_index(temp_dir.path(), "test").unwrap()
    else {
        panic!("expected mapped index");
    };
    let restored = context.make_items(&HashSet::new());
    assert_eq!(restored.len(), 10);
    for (item, expected) in restored.iter().zip(items.iter().skip(1).step_by(2)) {
        assert_eq!(item.id, expected.id);
        assert_eq!(bits(&item.embedding), bits(&expected.embedding));
    }
}

#[test]
fn test_store_kind_builds_matching_store() {
    assert_eq!(StoreKind::Json.build(false).kind(), StoreKind::Json);
    assert_eq!(
        StoreKind::MemoryMapped.build(true).kind(),
        StoreKind::MemoryMapped
    );
}
