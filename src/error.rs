//! Error types for the indexing layer

use thiserror::Error;

/// Result type alias for indexing operations
pub type Result<T> = std::result::Result<T, IndexError>;

/// Error types that can occur while defining, maintaining or querying indices
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid index type: {kind}")]
    InvalidIndexKind { kind: String },

    #[error("Unknown key normalizer: {name}")]
    UnknownNormalizer { name: String },

    #[error("Index defined more than once: {field}")]
    DuplicateIndex { field: String },

    #[error("Invalid default for index {field}: {reason}")]
    InvalidDefault { field: String, reason: String },

    #[error("Unknown index: {field}")]
    UnknownIndex { field: String },

    #[error("Unknown accessor: {name}")]
    UnknownAccessor { name: String },

    #[error("Index {field} is a {actual} index, not a {expected} index")]
    IndexKindMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Record already exists: {id}")]
    DuplicateId { id: String },

    #[error("Record {id} is outside this view")]
    OutsideView { id: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
