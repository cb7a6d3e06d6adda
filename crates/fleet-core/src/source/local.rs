//! A package living in a directory the engine does not manage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{DataSource, local_version};
use crate::Result;
use crate::lock::Versioned;
use crate::progress::Breadcrumb;

#[derive(Debug, Clone)]
pub struct LocalSource {
    path: PathBuf,
}

impl LocalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for LocalSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_change_history(&self) -> bool {
        false
    }

    async fn refresh(&self, record: &mut Versioned, _log: &Breadcrumb) -> Result<()> {
        let version = local_version(&self.path);
        record.current_version = version.clone();
        record.remote_version = version;
        record.commits_behind.clear();
        record.touch();
        Ok(())
    }

    async fn update(&self, _record: &mut Versioned, _log: &Breadcrumb) -> Result<bool> {
        Ok(false)
    }
}
