//! MCU firmware built from the local Klipper tree.
//!
//! There is no remote: an MCU is "behind" when the checkout moved past the
//! commit its firmware was built from and any of the commits touched the
//! firmware sources.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_git::Checkout;
use fleet_git::describe::commit_of_version;
use tokio::task;

use super::DataSource;
use crate::Result;
use crate::lock::{TaggedCommit, UNKNOWN_VERSION, Versioned};
use crate::progress::Breadcrumb;

const FIRMWARE_PATHS: [&str; 3] = ["src", "lib", "Makefile"];

#[derive(Debug, Clone)]
pub struct FirmwareSource {
    checkout: PathBuf,
    output: PathBuf,
}

impl FirmwareSource {
    pub fn new(checkout: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            checkout: checkout.into(),
            output: output.into(),
        }
    }

    pub fn checkout(&self) -> &Path {
        &self.checkout
    }
}

fn pending(checkout: &Path, built: &str) -> fleet_git::Result<(Vec<TaggedCommit>, Option<String>)> {
    let repo = Checkout::open(checkout)?;
    let from = repo.resolve(&commit_of_version(built)?)?;
    let backlog = repo.backlog(from, repo.head()?, &FIRMWARE_PATHS)?;
    if backlog.is_empty() {
        return Ok((Vec::new(), None));
    }
    let head = repo.describe_workdir()?;
    Ok((backlog.into_iter().map(Into::into).collect(), Some(head)))
}

#[async_trait]
impl DataSource for FirmwareSource {
    fn path(&self) -> &Path {
        &self.output
    }

    fn has_change_history(&self) -> bool {
        true
    }

    async fn refresh(&self, record: &mut Versioned, _log: &Breadcrumb) -> Result<()> {
        if record.current_version == UNKNOWN_VERSION {
            return Ok(());
        }

        let (checkout, built) = (self.checkout.clone(), record.current_version.clone());
        let (backlog, head) = task::spawn_blocking(move || pending(&checkout, &built)).await??;

        record.remote_version = head.unwrap_or_else(|| record.current_version.clone());
        record.commits_behind = backlog;
        record.touch();
        Ok(())
    }

    async fn update(&self, _record: &mut Versioned, _log: &Breadcrumb) -> Result<bool> {
        tokio::fs::create_dir_all(&self.output).await?;
        Ok(false)
    }
}
