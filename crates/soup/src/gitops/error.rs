//! Version-control error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while talking to the source repository.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to prepare clone location '{path}': {source}")]
    CloneLocation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git repository not cloned at '{0}'")]
    GitNotCloned(PathBuf),

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("Invalid remote URL '{url}': {reason}")]
    InvalidRemote { url: String, reason: String },

    #[error("File operation failed: {0}")]
    FileOperation(String),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::FileOperation(err.to_string())
    }
}

impl SourceError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::GitNetworkError(_))
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> SourceError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return SourceError::GitNetworkError(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
    {
        return SourceError::GitAuthFailed(stderr.trim().to_string());
    }

    SourceError::GitOperation(stderr.trim().to_string())
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
