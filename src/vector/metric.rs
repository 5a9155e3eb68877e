//! Distance metrics used to rank stored vectors against a query.
//!
//! Every metric pairs a scoring function with a ranking direction. The
//! similarity index never interprets raw scores itself; it asks the metric
//! which of two scores ranks first.
//!
//! # Metrics
//! - [`DotProduct`]: sum of elementwise products, higher is better. Assumes
//!   the embedding model emits unit-length vectors.
//! - [`CosineSimilarity`]: dot product over the product of magnitudes,
//!   higher is better, 0.0 when either magnitude is 0.
//! - [`EuclideanDistance`]: L2 distance, lower is better.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::vector::types::VectorError;

/// Direction in which scores rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankOrder {
    /// Larger scores are better matches (similarities).
    HigherIsBetter,
    /// Smaller scores are better matches (distances).
    LowerIsBetter,
}

impl RankOrder {
    /// Orders two scores so that the better one compares as `Less`.
    ///
    /// Uses `total_cmp`, so a NaN never panics a sort; it ranks after every
    /// real score in either direction.
    #[must_use]
    pub fn compare(self, a: f32, b: f32) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        match self {
            Self::HigherIsBetter => b.total_cmp(&a),
            Self::LowerIsBetter => a.total_cmp(&b),
        }
    }

    /// Returns true if `score` is at least as good as `threshold`.
    #[must_use]
    pub fn passes(self, score: f32, threshold: f32) -> bool {
        match self {
            Self::HigherIsBetter => score >= threshold,
            Self::LowerIsBetter => score <= threshold,
        }
    }
}

/// Scoring strategy plus its ranking direction.
///
/// Implementations are pure and stateless, so a single instance can score
/// any number of vectors from any thread.
pub trait DistanceMetric: Send + Sync {
    /// Scores `query` against `candidate`.
    ///
    /// Returns `DimensionMismatch` if the lengths differ; vectors are never
    /// truncated or padded.
    fn score(&self, query: &[f32], candidate: &[f32]) -> Result<f32, VectorError>;

    /// Direction in which this metric's scores rank.
    fn order(&self) -> RankOrder;

    /// Stable identifier, matches [`MetricKind`] names.
    fn name(&self) -> &'static str;
}

fn ensure_same_len(a: &[f32], b: &[f32]) -> Result<(), VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product similarity.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotProduct;

impl DistanceMetric for DotProduct {
    fn score(&self, query: &[f32], candidate: &[f32]) -> Result<f32, VectorError> {
        ensure_same_len(query, candidate)?;
        Ok(dot(query, candidate))
    }

    fn order(&self) -> RankOrder {
        RankOrder::HigherIsBetter
    }

    fn name(&self) -> &'static str {
        "dot_product"
    }
}

/// Cosine similarity.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineSimilarity;

impl DistanceMetric for CosineSimilarity {
    fn score(&self, query: &[f32], candidate: &[f32]) -> Result<f32, VectorError> {
        ensure_same_len(query, candidate)?;
        let magnitude_a = magnitude(query);
        let magnitude_b = magnitude(candidate);

        if magnitude_a == 0.0 || magnitude_b == 0.0 {
            return Ok(0.0);
        }

        Ok(dot(query, candidate) / (magnitude_a * magnitude_b))
    }

    fn order(&self) -> RankOrder {
        RankOrder::HigherIsBetter
    }

    fn name(&self) -> &'static str {
        "cosine"
    }
}

/// Euclidean (L2) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl DistanceMetric for EuclideanDistance {
    fn score(&self, query: &[f32], candidate: &[f32]) -> Result<f32, VectorError> {
        ensure_same_len(query, candidate)?;
        let sum: f32 = query
            .iter()
            .zip(candidate)
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum();
        Ok(sum.sqrt())
    }

    fn order(&self) -> RankOrder {
        RankOrder::LowerIsBetter
    }

    fn name(&self) -> &'static str {
        "euclidean"
    }
}

/// Configurable metric selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[default]
    DotProduct,
    Cosine,
    Euclidean,
}

impl MetricKind {
    /// Builds the metric this kind names.
    #[must_use]
    pub fn build(self) -> Box<dyn DistanceMetric> {
        match self {
            Self::DotProduct => Box::new(DotProduct),
            Self::Cosine => Box::new(CosineSimilarity),
            Self::Euclidean => Box::new(EuclideanDistance),
        }
    }
}

impl FromStr for MetricKind {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dot_product" | "dotproduct" | "dot" => Ok(Self::DotProduct),
            "cosine" => Ok(Self::Cosine),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(VectorError::UnknownMetric(other.to_string())),
        }
    }
}
