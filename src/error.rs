//! Error types for the knowledge map system
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

use crate::labels::LabelRefinementError;
use crate::vector::{ClusteringError, LayoutError, VectorError};

/// Main error type for building, loading and querying an index
#[derive(Error, Debug)]
pub enum IndexError {
    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Corpus could not be decoded
    #[error("Failed to parse corpus '{path}': {reason}")]
    CorpusParse { path: PathBuf, reason: String },

    /// Build pipeline errors (fatal, nothing is persisted)
    #[error("Index build failed during {stage}: {reason}")]
    BuildFailed { stage: String, reason: String },

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(#[from] VectorError),

    #[error("Clustering failed: {0}")]
    ClusteringFailed(#[from] ClusteringError),

    #[error("Layout projection failed: {0}")]
    LayoutFailed(#[from] LayoutError),

    /// Storage errors
    #[error("Failed to persist index to '{path}': {source}")]
    PersistenceError {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to load index from '{path}': {source}")]
    LoadError {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Snapshot on disk is inconsistent
    #[error("Index snapshot is corrupted: {reason}")]
    SnapshotCorrupt { reason: String },

    /// Query errors
    #[error("Cluster {id} not found. It is out of range or has no members.")]
    ClusterNotFound { id: i64 },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    /// General errors for cases where we need to preserve existing behavior
    #[error("{0}")]
    General(String),
}

impl IndexError {
    /// Shorthand for a fatal build error at a named pipeline stage.
    pub fn build(stage: &str, reason: impl Into<String>) -> Self {
        Self::BuildFailed {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a snapshot consistency failure.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::SnapshotCorrupt {
            reason: reason.into(),
        }
    }

    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::CorpusParse { .. } => "CORPUS_PARSE_ERROR",
            Self::BuildFailed { .. } => "BUILD_FAILED",
            Self::EmbeddingFailed(_) => "EMBEDDING_FAILED",
            Self::ClusteringFailed(_) => "CLUSTERING_FAILED",
            Self::LayoutFailed(_) => "LAYOUT_FAILED",
            Self::PersistenceError { .. } => "PERSISTENCE_ERROR",
            Self::LoadError { .. } => "LOAD_ERROR",
            Self::SnapshotCorrupt { .. } => "SNAPSHOT_CORRUPT",
            Self::ClusterNotFound { .. } => "NOT_FOUND",
            Self::ConfigError { .. } => "CONFIG_ERROR",
            Self::General(_) => "GENERAL_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::SnapshotCorrupt { .. } => vec![
                "Run 'knowmap build <corpus>' to rebuild the snapshot from scratch",
                "Check for disk errors or an interrupted copy of the index directory",
            ],
            Self::LoadError { .. } => vec![
                "Check that 'index_path' in .knowmap/settings.toml points at a built index",
                "Run 'knowmap build <corpus>' if no index exists yet",
            ],
            Self::PersistenceError { .. } | Self::FileWrite { .. } => vec![
                "Check disk space and permissions in the index directory",
                "The previous snapshot, if any, was left untouched",
            ],
            Self::EmbeddingFailed(_) => vec![
                "Ensure you have internet connection for first-time model download",
                "Use --offline to build with the hashed text embedder",
            ],
            Self::ClusteringFailed(_) | Self::BuildFailed { .. } => vec![
                "Check that the corpus has at least as many documents as fine clusters",
                "Lower build.coarse_count / build.fine_count in settings",
            ],
            Self::CorpusParse { .. } => vec![
                "The corpus must be a JSON array, an {\"articles\": [...]} object, or JSON Lines",
            ],
            Self::ClusterNotFound { .. } => {
                vec!["Run 'knowmap map' to list the populated cluster ids"]
            }
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            _ => vec![],
        }
    }
}

impl From<LabelRefinementError> for IndexError {
    fn from(err: LabelRefinementError) -> Self {
        Self::General(format!("Label refinement failed: {err}"))
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T, IndexError>;

    /// Add context with a path
    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T, IndexError> {
        self.map_err(|e| IndexError::General(format!("{msg}: {e}")))
    }

    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError> {
        self.map_err(|e| {
            IndexError::General(format!("Error processing '{}': {}", path.display(), e))
        })
    }
}
