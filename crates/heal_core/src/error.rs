//! Error types for the core module.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid fix plan for {issue_id}: {message}")]
    InvalidPlan { issue_id: String, message: String },

    #[error("Line {line} is outside {path} ({total} lines)")]
    LineOutOfRange {
        path: PathBuf,
        line: u32,
        total: usize,
    },

    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Path {0} is outside the repository")]
    PathOutsideRepo(PathBuf),

    #[error("Git error: {0}")]
    Git(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
