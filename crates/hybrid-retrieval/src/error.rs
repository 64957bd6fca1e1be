//! Error types for hybrid retrieval

use thiserror::Error;

/// Result type alias using RetrievalError
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur while indexing or searching documents
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Metadata store query failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Text could not be embedded
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector length differs from the index dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Query pattern failed to compile
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }
}
