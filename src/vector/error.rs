//! Vector index error types.

use thiserror::Error;

/// Coarse classification of a [`VectorError`], used by callers to decide
/// whether to fix the call, fall back, or retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The call itself is wrong (dimension, metric, missing collection).
    Configuration,
    /// The backing ANN library could not be used.
    BackingUnavailable,
    /// Disk or storage failure; the caller may retry.
    TransientIo,
}

/// Errors that can occur during vector operations.
#[derive(Debug, Error)]
pub enum VectorError {
    /// Vector length does not match the collection dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Existing collection was created with another similarity metric
    #[error("metric mismatch: collection uses {existing}, requested {requested}")]
    MetricMismatch { existing: String, requested: String },

    /// Collection was never created in this process
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// Handle name cannot be used as a directory name
    #[error("invalid collection handle: {0:?}")]
    InvalidHandle(String),

    /// usearch raised an error
    #[error("ann backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error from the record store or a collection file
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("index lock poisoned")]
    LockPoisoned,
}

impl VectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DimensionMismatch { .. }
            | Self::MetricMismatch { .. }
            | Self::CollectionNotFound(_)
            | Self::InvalidHandle(_) => ErrorKind::Configuration,
            Self::Backend(_) => ErrorKind::BackingUnavailable,
            Self::Io(_) | Self::Storage(_) | Self::LockPoisoned => ErrorKind::TransientIo,
        }
    }

    pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let mismatch = VectorError::DimensionMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(mismatch.kind(), ErrorKind::Configuration);
        assert_eq!(
            VectorError::CollectionNotFound("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            VectorError::backend("no simd").kind(),
            ErrorKind::BackingUnavailable
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(VectorError::from(io).kind(), ErrorKind::TransientIo);
    }

    #[test]
    fn mismatch_message_names_both_sides() {
        let err = VectorError::DimensionMismatch {
            expected: 384,
            actual: 12,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 384, got 12");
    }
}
