//! Vector retrieval subsystem.
//!
//! One capability set, [`VectorIndex`], with two implementations:
//!
//! - [`ExactScanIndex`] scores every live record in the record store on each
//!   query. Always exact, always current, O(n).
//! - [`ApproximateIndex`] binds one collection of an [`AnnStore`] (usearch
//!   HNSW). Writes are buffered and folded in by `rebuild`; `search` rebuilds
//!   first whenever the buffer is dirty, so a deleted id is never returned.
//!
//! [`select_index`] picks the active implementation once at startup and
//! falls back to the exact scan if the approximate index cannot be opened.

pub mod ann;
pub mod collection;
pub mod error;
pub mod exact;
pub mod selector;

use serde::{Deserialize, Serialize};

pub use ann::{AnnConfig, AnnStore, ApproximateIndex, CollectionHandle};
pub use error::{ErrorKind, VectorError};
pub use exact::ExactScanIndex;
pub use selector::{backfill, select_index, ActiveIndex, BackfillReport};

/// Similarity metric of a collection. Vectors are unit-norm, so cosine
/// similarity equals the dot product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cosine,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            _ => Err(format!("unknown metric: {s}")),
        }
    }
}

/// A scored record id. Lists are sorted by descending score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
}

impl SearchResult {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    /// Live entries (after the most recent rebuild for the approximate index)
    pub count: usize,
    pub dimension: usize,
    /// Bytes on disk attributable to the index
    pub size_bytes: u64,
}

/// The capability set every active index provides.
///
/// Consumers (the recall engine and the write path) depend only on this
/// trait. The approximate index serializes access internally; `search` can
/// block for the length of a rebuild.
pub trait VectorIndex: Send + Sync {
    /// Short implementation name for logs and stats output.
    fn name(&self) -> &'static str;

    fn dimension(&self) -> usize;

    /// Insert or replace the vector stored for `id`.
    fn upsert(&self, id: &str, vector: &[f32]) -> Result<(), VectorError>;

    /// Up to `k` nearest entries, best first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, VectorError>;

    /// Remove `id`. Returns `true` iff the id was present.
    fn delete(&self, id: &str) -> Result<bool, VectorError>;

    fn stats(&self) -> Result<IndexStats, VectorError>;

    /// Fold buffered writes into the queryable structure. No-op by default.
    fn rebuild(&self) -> Result<(), VectorError> {
        Ok(())
    }
}

/// Reject vectors whose length differs from `expected`.
pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), VectorError> {
    if vector.len() != expected {
        return Err(VectorError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_norm() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!((dot(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0; 4];
        normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }

    #[test]
    fn dimension_check_reports_lengths() {
        assert!(check_dimension(3, &[0.0, 0.0, 1.0]).is_ok());
        match check_dimension(3, &[1.0]) {
            Err(VectorError::DimensionMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (3, 1));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn metric_round_trips_through_str() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!(Metric::Cosine.to_string(), "cosine");
        assert!("l2".parse::<Metric>().is_err());
    }
}
