//! Error vocabulary for the reflective memory management core.
//!
//! Mirrors the teacher's `Mem0Error` shape (a small closed set of variants
//! wrapping collaborator errors in `anyhow::Error`), extended with the
//! structured numerical/persistence variants spec.md §7 names explicitly.
//! `LLMExtractionFailure`, `LLMDecisionFailure`, and `MissingContextSkip`
//! deliberately have **no** variant here: spec.md treats them as in-place
//! degrade conditions (return `NO_TRAIT`/`ADD`/no-op), not `Err` returns.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RmmError {
    /// Vector lengths did not match where they were required to.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A vector used in a similarity computation had zero norm.
    #[error("zero-norm vector encountered")]
    ZeroNorm,

    /// Language model collaborator failed.
    #[error("language model error: {0}")]
    Llm(anyhow::Error),

    /// Embedding model collaborator failed.
    #[error("embedding error: {0}")]
    Embedding(anyhow::Error),

    /// Vector store collaborator failed.
    #[error("vector store error: {0}")]
    VectorStore(anyhow::Error),

    /// Persistence store failed to load a value.
    #[error("persistence load failed for key {key}: {source}")]
    PersistenceLoad { key: String, source: anyhow::Error },

    /// Persistence store failed to save a value.
    #[error("persistence save failed for key {key}: {source}")]
    PersistenceSave { key: String, source: anyhow::Error },

    /// A persisted value failed schema validation on load.
    #[error("schema validation failed for key {key}: {reason}")]
    SchemaValidation { key: String, reason: String },
}

pub type Result<T> = core::result::Result<T, RmmError>;
