//! Error types for fleet-git

use std::path::PathBuf;

/// Result type for fleet-git operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fleet-git operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Filesystem error: {0}")]
    Fs(#[from] fleet_fs::Error),

    #[error("No git repository at {path}")]
    NotARepository { path: PathBuf },

    #[error("Reference '{name}' not found")]
    RefNotFound { name: String },

    #[error("Cannot find a commit in version '{version}'")]
    InvalidVersion { version: String },
}
