//! Error types for nc-configurator

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfiguratorError {
    /// A required artifact (directory, file) does not exist
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// An existing artifact could not be parsed
    #[error("{} is probably corrupted: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// An existing artifact could not be read
    #[error("failed to read {}: {reason}", .path.display())]
    ReadError { path: PathBuf, reason: String },

    /// Persisting a change failed; staged state is kept for a retry
    #[error("failed to write {}: {reason}", .path.display())]
    WriteError { path: PathBuf, reason: String },

    /// The reload notification could not be delivered
    #[error("could not signal reload via {}: {reason}", .path.display())]
    SignalError { path: PathBuf, reason: String },

    /// Source and destination of a file copy are the same file
    #[error("could not copy {}: source and destination are the same file", .0.display())]
    SameFile(PathBuf),

    /// The persisted document does not have the expected shape
    #[error("invalid datastore content in {}: {reason}", .path.display())]
    InvalidStructure { path: PathBuf, reason: String },

    /// Malformed node path expression
    #[error("invalid node path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A staging request was refused before touching any state
    #[error("{0}")]
    Rejected(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfiguratorError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::WriteError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfiguratorError>;
