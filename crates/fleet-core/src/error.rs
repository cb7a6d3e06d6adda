//! Error types for fleet-core

use std::path::PathBuf;

/// Result type for fleet-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Release API and download failures, classified by cause.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("cannot reach {url}: {message}")]
    Connect { url: String, message: String },

    #[error("{url} rejected the request ({status})")]
    Client { url: String, status: u16 },

    #[error("{url} failed to answer ({status})")]
    Server { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Other { url: String, message: String },
}

impl FetchError {
    pub(crate) fn classify(url: &str, error: reqwest::Error) -> Self {
        let url = url.to_string();
        match error.status() {
            Some(status) if status.is_client_error() => Self::Client {
                url,
                status: status.as_u16(),
            },
            Some(status) if status.is_server_error() => Self::Server {
                url,
                status: status.as_u16(),
            },
            _ if error.is_connect() || error.is_timeout() => Self::Connect {
                url,
                message: error.to_string(),
            },
            _ => Self::Other {
                url,
                message: error.to_string(),
            },
        }
    }
}

/// Errors that can occur in fleet-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Lock file {path} cannot be decoded: {message}")]
    LockDecode { path: PathBuf, message: String },

    #[error("Unknown provider '{name}'")]
    UnknownProvider { name: String },

    #[error("Invalid configuration for provider '{provider}': {message}")]
    ProviderConfig { provider: String, message: String },

    #[error("No supported package manager on this host")]
    UnsupportedPackageManager,

    #[error("{name} did not finish its last update, run update again")]
    Unfinished { name: String },

    #[error("Invalid archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("Refusing to remove relative path '{path}'")]
    RelativeRemoval { path: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] FetchError),

    #[error(transparent)]
    Fs(#[from] fleet_fs::Error),

    #[error(transparent)]
    Git(#[from] fleet_git::Error),

    #[error(transparent)]
    Exec(#[from] fleet_exec::Error),

    #[error(transparent)]
    Meta(#[from] fleet_meta::Error),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn archive(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
