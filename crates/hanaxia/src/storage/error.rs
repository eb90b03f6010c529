//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Key contains characters that cannot map to a file name.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Blob is not valid JSON for the requested type.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
