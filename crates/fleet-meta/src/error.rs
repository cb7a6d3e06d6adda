//! Error types for fleet-meta

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Filesystem error: {0}")]
    Fs(#[from] fleet_fs::Error),

    #[error("No manifest (fleet.yml or fleet.yaml) in {path}")]
    ManifestNotFound { path: PathBuf },

    #[error("Invalid {what}: {message}")]
    Invalid { what: &'static str, message: String },

    #[error("Unknown {what} in {definition}")]
    UnknownDiscriminator { what: &'static str, definition: String },

    #[error("Invalid identifier '{value}', expected '<type>#<id>'")]
    InvalidIdentifier { value: String },
}

impl Error {
    pub(crate) fn invalid(what: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            what,
            message: message.into(),
        }
    }

    pub(crate) fn unknown(what: &'static str, definition: &serde_yaml::Value) -> Self {
        let definition = serde_yaml::to_string(definition)
            .map(|s| s.trim().replace('\n', ", "))
            .unwrap_or_else(|_| "<unprintable>".to_string());
        Self::UnknownDiscriminator { what, definition }
    }
}
