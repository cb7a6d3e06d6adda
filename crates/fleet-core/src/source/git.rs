//! Git repositories tracked against a remote branch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_git::{Checkout, CommitInfo};
use tokio::task;

use super::DataSource;
use crate::Result;
use crate::lock::{UNKNOWN_VERSION, Versioned};
use crate::progress::Breadcrumb;

#[derive(Debug, Clone)]
pub struct GitSource {
    path: PathBuf,
    url: String,
    branch: String,
}

/// State of a checkout after fetching.
struct Snapshot {
    current: String,
    remote: Option<String>,
    backlog: Vec<CommitInfo>,
    fetch_error: Option<String>,
}

impl GitSource {
    pub fn new(path: impl Into<PathBuf>, url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
            branch: branch.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }
}

fn inspect(path: &Path, branch: &str, log: &Breadcrumb) -> fleet_git::Result<Snapshot> {
    let checkout = Checkout::open(path)?;
    let fetched = checkout.fetch(&mut |line| log.output(line));
    let current = checkout.describe_workdir()?;

    if let Err(e) = fetched {
        return Ok(Snapshot {
            current,
            remote: None,
            backlog: Vec::new(),
            fetch_error: Some(e.to_string()),
        });
    }

    let head = checkout.head()?;
    let tip = checkout.remote_tip(branch)?;
    Ok(Snapshot {
        current,
        remote: Some(checkout.describe_commit(tip)?),
        backlog: checkout.backlog(head, tip, &[])?,
        fetch_error: None,
    })
}

/// Clone or hard-reset onto the remote branch; returns whether the tree
/// changed and the resulting version.
fn sync(path: &Path, url: &str, branch: &str, log: &Breadcrumb) -> fleet_git::Result<(bool, String)> {
    if !path.exists() {
        log.info("Cloning repository...");
        let checkout = Checkout::init_from_remote(path, url, branch, &mut |line| log.output(line))?;
        log.info("Repository cloned!");
        return Ok((true, checkout.describe_workdir()?));
    }

    let checkout = Checkout::open(path)?;
    checkout.fetch(&mut |line| log.output(line))?;
    let tip = checkout.remote_tip(branch)?;
    let changed = checkout.differs_from(tip)?;
    if changed {
        checkout.reset_hard(tip)?;
    }
    Ok((changed, checkout.describe_workdir()?))
}

#[async_trait]
impl DataSource for GitSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_change_history(&self) -> bool {
        true
    }

    async fn refresh(&self, record: &mut Versioned, log: &Breadcrumb) -> Result<()> {
        if self.path.exists() {
            let (path, branch, crumb) = (self.path.clone(), self.branch.clone(), log.clone());
            let snapshot = task::spawn_blocking(move || inspect(&path, &branch, &crumb)).await??;

            if let Some(error) = &snapshot.fetch_error {
                log.warn(format!("Cannot fetch {}: {error}", self.url));
            }
            record.current_version = snapshot.current;
            record.remote_version = snapshot.remote.unwrap_or_else(|| UNKNOWN_VERSION.to_string());
            record.commits_behind = snapshot.backlog.into_iter().map(Into::into).collect();
        } else {
            log.info(format!("No local copy in \"{}\"", self.path.display()));
            let (url, branch) = (self.url.clone(), self.branch.clone());
            let remote = task::spawn_blocking(move || fleet_git::remote_version(&url, &branch)).await?;

            record.current_version = UNKNOWN_VERSION.to_string();
            record.remote_version = remote.unwrap_or_else(|e| {
                log.warn(format!("Cannot reach {}: {e}", self.url));
                UNKNOWN_VERSION.to_string()
            });
            record.commits_behind.clear();
        }
        record.touch();
        tracing::debug!(
            url = %self.url,
            current = %record.current_version,
            remote = %record.remote_version,
            behind = record.commits_behind.len(),
            "refreshed git source"
        );
        Ok(())
    }

    async fn update(&self, record: &mut Versioned, log: &Breadcrumb) -> Result<bool> {
        if record.is_up_to_date() && self.path.exists() {
            return Ok(false);
        }

        let (path, url, branch, crumb) = (self.path.clone(), self.url.clone(), self.branch.clone(), log.clone());
        let (changed, version) = task::spawn_blocking(move || sync(&path, &url, &branch, &crumb)).await??;

        record.current_version = version.clone();
        record.remote_version = version;
        record.commits_behind.clear();
        Ok(changed)
    }
}
