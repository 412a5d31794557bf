//! Error taxonomy for the retrieval core.
//!
//! Validation and not-found errors are caller-recoverable and never retried.
//! Storage errors distinguish "the blob store is unreachable" from "the bytes we got
//! back are not a snapshot we can read", because startup treats both as "start fresh"
//! while a failed save must reach the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad input: wrong dimension, zero-norm vector, negative id, non-positive top_k, ...
    #[error("validation failed: {0}")]
    Validation(String),

    /// A batch add contained vectors that cannot be normalized.
    #[error("batch rejected: embeddings at positions {positions:?} have zero or near-zero norm")]
    PartialBatch { positions: Vec<usize> },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The blob store could not be reached or refused the operation.
    #[error("storage unavailable for '{key}': {reason}")]
    StorageUnavailable { key: String, reason: String },

    /// Persisted index bytes failed format validation.
    #[error("corrupt index snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// `true` for errors the caller caused and can fix by changing the input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::PartialBatch { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_batch_lists_every_position() {
        let err = Error::PartialBatch {
            positions: vec![1, 4, 7],
        };
        assert!(err.to_string().contains("[1, 4, 7]"));
        assert!(err.is_validation());
    }

    #[test]
    fn not_found_message() {
        let err = Error::not_found("circle", 42);
        assert_eq!(err.to_string(), "circle 42 not found");
        assert!(err.is_not_found());
        assert!(!err.is_validation());
    }
}
