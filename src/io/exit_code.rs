//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success
//! - `1`: General error - unspecified failure
//! - `2`: Blocking error - a build could not produce a snapshot
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::error::IndexError;

/// Standard exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Build failure; no snapshot was written (code 2)
    BlockingError = 2,

    /// Cluster id invalid or empty (code 3)
    NotFound = 3,

    /// Corpus could not be parsed (code 4)
    ParseError = 4,

    /// File I/O error (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Snapshot missing fields or misaligned (code 7)
    IndexCorrupted = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

impl ExitCode {
    /// Convert an `IndexError` to the appropriate exit code.
    ///
    /// Maps specific error types to semantic exit codes that scripts
    /// can use to determine appropriate recovery actions.
    pub fn from_error(error: &IndexError) -> Self {
        match error {
            IndexError::ClusterNotFound { .. } => ExitCode::NotFound,

            IndexError::SnapshotCorrupt { .. } => ExitCode::IndexCorrupted,

            // Nothing was persisted
            IndexError::BuildFailed { .. }
            | IndexError::EmbeddingFailed(_)
            | IndexError::ClusteringFailed(_)
            | IndexError::LayoutFailed(_) => ExitCode::BlockingError,

            IndexError::CorpusParse { .. } => ExitCode::ParseError,
            IndexError::FileRead { .. }
            | IndexError::FileWrite { .. }
            | IndexError::PersistenceError { .. }
            | IndexError::LoadError { .. } => ExitCode::IoError,
            IndexError::ConfigError { .. } => ExitCode::ConfigError,

            IndexError::General(_) => ExitCode::GeneralError,
        }
    }

    /// Check if this exit code indicates a blocking error.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError)
    }

    /// Check if this exit code indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Get a human-readable description of the exit code.
    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Build failed - no snapshot written",
            ExitCode::NotFound => "Not found",
            ExitCode::ParseError => "Parse error",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::IndexCorrupted => "Index corrupted",
        }
    }
}
