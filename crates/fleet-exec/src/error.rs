//! Error types for fleet-exec

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for fleet-exec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running external commands
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit, with everything needed to reproduce it.
    #[error("Command `{command}` failed (exit code {code}): {stderr}")]
    CommandFailed {
        command: String,
        cwd: Option<PathBuf>,
        env: BTreeMap<String, String>,
        code: i32,
        stderr: String,
    },

    #[error("Command `{command}` timed out after {}s", after.as_secs())]
    Timeout { command: String, after: Duration },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
