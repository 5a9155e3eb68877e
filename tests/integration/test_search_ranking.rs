//! Ranking behaviour of the similarity index across metrics.

use crate::common::{as_new_items, dot_index, index_with, random_items, vector_item};
use simsearch::vector::{CosineSimilarity, DotProduct, EuclideanDistance};
use simsearch::{IndexError, JsonStore, MemoryMappedStore, MetricKind};

#[tokio::test]
async fn test_dot_product_scenario() {
    let mut index = dot_index(Box::new(MemoryMappedStore::new()), 4);
    index
        .add_items(vec![
            vector_item("item-1", vec![1.0, 0.0, 0.0, 0.0]),
            vector_item("item-2", vec![0.0, 1.0, 0.0, 0.0]),
            vector_item("item-3", vec![0.7, 0.7, 0.0, 0.0]),
        ])
        .await
        .unwrap();

    let results = index.search_vector(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "item-1");
    assert_eq!(results[0].text, "text of item-1");
    assert_eq!(results[0].metadata["n"], "item-1");
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert_eq!(results[1].id, "item-3");
    assert!((results[1].score - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_ranking_follows_metric_direction() {
    let corpus = random_items(200, 16, 7);
    let query = random_items(1, 16, 99).remove(0).embedding;

    for kind in [MetricKind::DotProduct, MetricKind::Cosine, MetricKind::Euclidean] {
        let mut index = index_with(Box::new(JsonStore::new()), kind.build(), 16);
        index.add_items(as_new_items(&corpus)).await.unwrap();

        let results = index.search_vector(&query, 50).unwrap();
        assert_eq!(results.len(), 50);

        let ascending = results.windows(2).all(|w| w[0].score <= w[1].score);
        let descending = results.windows(2).all(|w| w[0].score >= w[1].score);
        match kind {
            MetricKind::Euclidean => assert!(ascending, "euclidean must rank ascending"),
            _ => assert!(descending, "{kind:?} must rank descending"),
        }
    }
}

#[tokio::test]
async fn test_cosine_ignores_magnitude() {
    let mut index = index_with(Box::new(JsonStore::new()), Box::new(CosineSimilarity), 2);
    index
        .add_items(vec![
            vector_item("long", vec![10.0, 0.0]),
            vector_item("diagonal", vec![1.0, 1.0]),
            vector_item("zero", vec![0.0, 0.0]),
        ])
        .await
        .unwrap();

    let results = index.search_vector(&[0.5, 0.0], 3).unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["long", "diagonal", "zero"]);
    assert_eq!(results[2].score, 0.0);
}

#[tokio::test]
async fn test_euclidean_prefers_nearest() {
    let mut index = index_with(Box::new(JsonStore::new()), Box::new(EuclideanDistance), 2);
    index
        .add_items(vec![
            vector_item("origin", vec![0.0, 0.0]),
            vector_item("target", vec![3.0, 4.0]),
        ])
        .await
        .unwrap();

    let results = index.search_vector(&[3.0, 3.9], 1).unwrap();
    assert_eq!(results[0].id, "target");
}

#[tokio::test]
async fn test_dimension_mismatch_scenario() {
    let mut index = dot_index(Box::new(MemoryMappedStore::new()), 4);
    index
        .add_item(vector_item("a", vec![0.5, 0.5, 0.5, 0.5]))
        .await
        .unwrap();

    let err = index
        .add_item(vector_item("b", vec![0.1, 0.2, 0.3, 0.4, 0.5]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IndexError::DimensionMismatch {
            expected: 4,
            actual: 5
        }
    ));
    assert!(!index.contains("b"));
    assert_eq!(index.item_count(), 1);
    assert_eq!(index.dimension(), 4);
}

#[tokio::test]
async fn test_query_with_wrong_dimension_is_rejected() {
    let mut index = dot_index(Box::new(JsonStore::new()), 4);
    index
        .add_item(vector_item("a", vec![1.0, 0.0, 0.0, 0.0]))
        .await
        .unwrap();

    let result = index.search_vector(&[1.0, 0.0], 1);
    assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
}

#[tokio::test]
async fn test_remove_then_readd_changes_ranking() {
    let mut index = index_with(Box::new(JsonStore::new()), Box::new(DotProduct), 2);
    index
        .add_items(vec![
            vector_item("a", vec![1.0, 0.0]),
            vector_item("b", vec![0.6, 0.8]),
        ])
        .await
        .unwrap();

    let before = index.search_vector(&[1.0, 0.0], 1).unwrap();
    assert_eq!(before[0].id, "a");

    assert!(index.remove_item("a"));
    assert!(!index.remove_item("a"));
    index
        .add_item(vector_item("a", vec![0.0, 1.0]))
        .await
        .unwrap();

    let after = index.search_vector(&[1.0, 0.0], 2).unwrap();
    let ids: Vec<&str> = after.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

#[tokio::test]
async fn test_k_larger_than_corpus_returns_everything() {
    let mut index = dot_index(Box::new(JsonStore::new()), 8);
    index
        .add_items(as_new_items(&random_items(3, 8, 1)))
        .await
        .unwrap();

    assert_eq!(index.search_vector(&[0.1; 8], 10).unwrap().len(), 3);
    assert!(index.search_vector(&[0.1; 8], 0).unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_index_search_is_empty() {
    let index = dot_index(Box::new(JsonStore::new()), 8);
    assert!(index.search("anything", 5).await.unwrap().is_empty());
}
