//! Error types for the retrieval engine
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::vector::VectorError;

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// A vector's length disagrees with the index dimension
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    /// The provider returned no vector for a text that had to be encoded
    #[error("Failed to encode {what}\nSuggestion: Verify the embedding model is properly initialized")]
    EncodingFailure { what: String },

    #[error("Item '{id}' already exists in the index\nSuggestion: Remove the existing item first")]
    DuplicateId { id: String },

    /// File system errors while reading or writing a store
    #[error("Failed to {operation} '{path}': {source}")]
    StoreIo {
        operation: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// A persisted document could not be (de)serialized
    #[error("Invalid index file '{path}': {reason}")]
    StoreFormat { path: PathBuf, reason: String },

    /// Persisted entries point outside the data they describe
    #[error("Index '{path}' failed integrity check: {reason}")]
    Integrity { path: PathBuf, reason: String },

    #[error("Invalid vector: {0}")]
    Vector(VectorError),

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },
}

impl IndexError {
    pub(crate) fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::StoreIo {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::StoreFormat {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn integrity(path: &Path, reason: impl Into<String>) -> Self {
        Self::Integrity {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::EncodingFailure { .. } => "ENCODING_FAILURE",
            Self::DuplicateId { .. } => "DUPLICATE_ID",
            Self::StoreIo { .. } => "STORE_IO_ERROR",
            Self::StoreFormat { .. } => "STORE_FORMAT_ERROR",
            Self::Integrity { .. } => "INTEGRITY_ERROR",
            Self::Vector(_) => "VECTOR_ERROR",
            Self::ConfigError { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::DimensionMismatch { .. } => vec![
                "Re-embed every document with the same model",
                "Run 'simsearch clear' if the embedding model changed",
            ],
            Self::Integrity { .. } => vec![
                "The data file is shorter than its sidecar claims; the last save was interrupted",
                "Run 'simsearch clear' and re-index the affected documents",
            ],
            Self::StoreFormat { .. } => vec![
                "The index file may be corrupted. Try rebuilding the index.",
            ],
            Self::StoreIo { .. } => vec!["Check disk space and file permissions"],
            _ => vec![],
        }
    }
}

impl From<VectorError> for IndexError {
    fn from(error: VectorError) -> Self {
        match error {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::Vector(other),
        }
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
