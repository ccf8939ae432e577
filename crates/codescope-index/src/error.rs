//! Error types for codescope-index.

use std::path::PathBuf;

/// Errors that can occur during indexing, retrieval, and sync.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Query or load against a repository whose index was never built.
    #[error("repository {0} is not indexed")]
    NotIndexed(String),

    /// Repository root missing at index time.
    #[error("repository not found: {}", .0.display())]
    RepositoryNotFound(PathBuf),

    /// File could not be read as text. Non-fatal during builds.
    #[error("unreadable file {}: {reason}", path.display())]
    UnreadableFile { path: PathBuf, reason: String },

    /// External lexical search tool missing or failed.
    #[error("lexical search tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Persisted metadata and vectors disagree. Requires a full rebuild.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    /// Vector length differs from the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding backend failure.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
