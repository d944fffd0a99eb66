//! Error types for conclave-state

use thiserror::Error;

/// Errors that can occur in the persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing medium failed (I/O, poisoned lock, closed handle).
    #[error("storage backend failed: {0}")]
    Backend(String),

    /// A record could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A persisted line could not be decoded.
    #[error("corrupt record at line {line}: {reason}")]
    CorruptRecord { line: usize, reason: String },

    /// A record was rejected before being written.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
