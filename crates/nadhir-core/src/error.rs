use thiserror::Error;

use crate::types::EntityKind;

/// Top-level error type for the Nadhir system.
///
/// Each variant corresponds to one class of failure in the store, index,
/// ingestion, or retrieval path. Subsystem crates return `NadhirError`
/// directly so the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NadhirError {
    /// A keyed lookup found nothing. Recoverable; the caller decides.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// A relation row referenced an entity that does not exist.
    /// Ingestion-local: the record is skipped and reported, never committed.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// An embedding vector did not match the index dimension.
    /// Fatal to that upsert; the index never truncates or pads.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    /// The external embedding provider failed (transport or auth).
    #[error("Embedding provider error: {0}")]
    Provider(String),

    /// Query-time embedding failed after retries or timed out. Surfaced to
    /// the retrieval caller instead of returning an empty-looking success.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for NadhirError {
    fn from(err: toml::de::Error) -> Self {
        NadhirError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for NadhirError {
    fn from(err: toml::ser::Error) -> Self {
        NadhirError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for NadhirError {
    fn from(err: serde_json::Error) -> Self {
        NadhirError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Nadhir operations.
pub type Result<T> = std::result::Result<T, NadhirError>;
