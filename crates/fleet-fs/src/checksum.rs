//! SHA-256 checksum utilities
//!
//! Checksums use one canonical format (`sha256:<hex>`). Recipe hashes are
//! built incrementally from manifest sections and tracked provider files.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::{Error, Result};

const PREFIX: &str = "sha256:";

/// Compute the SHA-256 checksum of string content.
pub fn compute_content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{}{:x}", PREFIX, hasher.finalize())
}

/// Incremental hasher for a package recipe.
#[derive(Debug, Clone, Default)]
pub struct RecipeHasher {
    hasher: Sha256,
}

impl RecipeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text section; surrounding whitespace is ignored.
    pub fn section(&mut self, text: &str) -> &mut Self {
        self.hasher.update(text.trim().as_bytes());
        self
    }

    /// Feed the content of a file.
    pub fn file(&mut self, path: &Path) -> Result<&mut Self> {
        let content = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        self.hasher.update(&content);
        Ok(self)
    }

    pub fn finish(self) -> String {
        format!("{}{:x}", PREFIX, self.hasher.finalize())
    }
}
