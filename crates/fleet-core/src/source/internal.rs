//! Packages bundled with fleet itself.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::DataSource;
use crate::Result;
use crate::lock::Versioned;
use crate::progress::Breadcrumb;

/// Wraps the source that fetches a bundled package's payload and remembers
/// where its manifest lives.
pub struct InternalSource {
    inner: Box<dyn DataSource>,
    package_path: PathBuf,
}

impl InternalSource {
    pub fn new(inner: Box<dyn DataSource>, package_path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            package_path: package_path.into(),
        }
    }
}

#[async_trait]
impl DataSource for InternalSource {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn has_change_history(&self) -> bool {
        self.inner.has_change_history()
    }

    fn package_path(&self) -> Option<&Path> {
        Some(&self.package_path)
    }

    async fn refresh(&self, record: &mut Versioned, log: &Breadcrumb) -> Result<()> {
        self.inner.refresh(record, log).await
    }

    async fn update(&self, record: &mut Versioned, log: &Breadcrumb) -> Result<bool> {
        self.inner.update(record, log).await
    }
}
