//! GitOps-specific error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during GitOps operations.
#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("Failed to read definitions directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Failed to serialize JSON: {0}")]
    SerializeJson(String),

    #[error("Invalid resource '{name}': {message}")]
    InvalidResource { name: String, message: String },

    #[error("No definitions found in '{0}'")]
    EmptyDefinitions(PathBuf),

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Repository has not changed since the last pull")]
    NoChange,

    #[error("Polling interval has not elapsed")]
    IntervalNotElapsed,

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git operation timed out after {0}s")]
    GitTimeout(u64),

    #[error("Git repository not initialized")]
    GitNotInitialized,

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("Control plane rejected {kind}/{name}: {reason}")]
    Rejected {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Control plane unreachable: {0}")]
    ControlPlaneUnreachable(String),

    #[error("Work queue is closed")]
    QueueClosed,

    #[error("Gitops {group}/{name} not found")]
    NotFound { group: String, name: String },

    #[error("Gitops {group}/{name} is busy: {reason}")]
    Conflict {
        group: String,
        name: String,
        reason: String,
    },

    #[error("File operation failed: {0}")]
    FileOperation(String),
}

/// Closed classification of [`GitOpsError`] used for policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Nothing changed upstream or on the server.
    NoChange,
    /// The polling interval gate is still closed.
    IntervalNotElapsed,
    /// Credentials missing or refused.
    Auth,
    /// Network, timeout or a collaborator that did not answer.
    Unreachable,
    /// The control plane refused a definition.
    Rejected,
    /// Malformed input: definitions, resources, paths.
    Invalid,
    /// Everything else.
    Internal,
}

impl From<serde_yaml::Error> for GitOpsError {
    fn from(err: serde_yaml::Error) -> Self {
        GitOpsError::ParseYaml {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GitOpsError {
    fn from(err: serde_json::Error) -> Self {
        GitOpsError::SerializeJson(err.to_string())
    }
}

impl From<std::io::Error> for GitOpsError {
    fn from(err: std::io::Error) -> Self {
        GitOpsError::FileOperation(err.to_string())
    }
}

impl GitOpsError {
    /// Returns the closed kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitOpsError::NoChange => ErrorKind::NoChange,
            GitOpsError::IntervalNotElapsed => ErrorKind::IntervalNotElapsed,
            GitOpsError::GitAuthFailed(_) => ErrorKind::Auth,
            GitOpsError::GitNetworkError(_)
            | GitOpsError::GitTimeout(_)
            | GitOpsError::ControlPlaneUnreachable(_) => ErrorKind::Unreachable,
            GitOpsError::Rejected { .. } => ErrorKind::Rejected,
            GitOpsError::ReadDirectory { .. }
            | GitOpsError::ReadFile { .. }
            | GitOpsError::ParseYaml { .. }
            | GitOpsError::InvalidResource { .. }
            | GitOpsError::EmptyDefinitions(_)
            | GitOpsError::PathTraversal(_) => ErrorKind::Invalid,
            _ => ErrorKind::Internal,
        }
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitOpsError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("repository not found")
    {
        return GitOpsError::GitNetworkError(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
    {
        return GitOpsError::GitAuthFailed(stderr.trim().to_string());
    }

    GitOpsError::GitOperation(stderr.trim().to_string())
}

/// Result type for GitOps operations.
pub type Result<T> = std::result::Result<T, GitOpsError>;
