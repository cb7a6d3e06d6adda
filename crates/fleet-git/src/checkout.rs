//! A package's local git checkout and its `origin` remote.

use std::path::{Path, PathBuf};

use git2::{AutotagOption, FetchOptions, FetchPrune, Oid, RemoteCallbacks, Repository, ResetType};

use crate::{Error, Result};

const ORIGIN: &str = "origin";

/// Local checkout tracking one branch of `origin`.
pub struct Checkout {
    path: PathBuf,
    repo: Repository,
}

impl std::fmt::Debug for Checkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout").field("path", &self.path).finish()
    }
}

impl Checkout {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::open(path).map_err(|_| Error::NotARepository {
            path: path.to_path_buf(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            repo,
        })
    }

    /// First-time install: init, add `origin`, fetch, create `branch` at
    /// `origin/<branch>` and hard-reset the working tree onto it.
    pub fn init_from_remote(
        path: &Path,
        url: &str,
        branch: &str,
        progress: &mut dyn FnMut(&str),
    ) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| fleet_fs::Error::io(path, e))?;
        let repo = Repository::init(path)?;
        repo.remote(ORIGIN, url)?;

        let checkout = Self {
            path: path.to_path_buf(),
            repo,
        };
        checkout.fetch(progress)?;

        let target = checkout.remote_tip(branch)?;
        {
            let commit = checkout.repo.find_commit(target)?;
            let mut local = checkout.repo.branch(branch, &commit, true)?;
            local.set_upstream(Some(&format!("{ORIGIN}/{branch}")))?;
        }
        checkout.repo.set_head(&format!("refs/heads/{branch}"))?;
        checkout.reset_hard(target)?;

        tracing::debug!(path = %path.display(), url, branch, "initialised checkout");
        Ok(checkout)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Fetch `origin` with pruning and all tags.
    pub fn fetch(&self, progress: &mut dyn FnMut(&str)) -> Result<()> {
        let mut remote = self.repo.find_remote(ORIGIN).map_err(|_| Error::RefNotFound {
            name: ORIGIN.to_string(),
        })?;

        let mut callbacks = RemoteCallbacks::new();
        callbacks.sideband_progress(|data| {
            let text = String::from_utf8_lossy(data);
            for line in text.split(['\r', '\n']).map(str::trim).filter(|l| !l.is_empty()) {
                progress(line);
            }
            true
        });

        let mut options = FetchOptions::new();
        options
            .prune(FetchPrune::On)
            .download_tags(AutotagOption::All)
            .remote_callbacks(callbacks);

        remote.fetch(&[] as &[&str], Some(&mut options), None)?;

        let stats = remote.stats();
        tracing::debug!(
            path = %self.path.display(),
            received = stats.received_objects(),
            "fetched origin"
        );
        Ok(())
    }

    /// URL of `origin`, `None` when the checkout has no such remote.
    pub fn origin_url(&self) -> Option<String> {
        self.repo
            .find_remote(ORIGIN)
            .ok()
            .and_then(|remote| remote.url().map(str::to_string))
    }

    /// Branch HEAD points at, `None` when detached.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = self.repo.head()?;

        if head.is_branch() {
            Ok(Some(head.shorthand().unwrap_or("HEAD").to_string()))
        } else {
            Ok(None)
        }
    }

    pub fn head(&self) -> Result<Oid> {
        Ok(self.repo.head()?.peel_to_commit()?.id())
    }

    /// Commit at `origin/<branch>` as of the last fetch.
    pub fn remote_tip(&self, branch: &str) -> Result<Oid> {
        let name = format!("refs/remotes/{ORIGIN}/{branch}");
        let reference = self
            .repo
            .find_reference(&name)
            .map_err(|_| Error::RefNotFound { name: name.clone() })?;
        Ok(reference.peel_to_commit()?.id())
    }

    /// Resolve any revision (`HEAD`, a sha prefix, a tag) to a commit.
    pub fn resolve(&self, rev: &str) -> Result<Oid> {
        let object = self.repo.revparse_single(rev).map_err(|_| Error::RefNotFound {
            name: rev.to_string(),
        })?;
        Ok(object.peel_to_commit()?.id())
    }

    /// True when the tree at HEAD differs from the tree at `target`.
    pub fn differs_from(&self, target: Oid) -> Result<bool> {
        let head = self.repo.head()?.peel_to_commit()?;
        let other = self.repo.find_commit(target)?;
        Ok(head.tree_id() != other.tree_id())
    }

    /// `git reset --hard <target>`
    pub fn reset_hard(&self, target: Oid) -> Result<()> {
        let object = self.repo.find_object(target, None)?;
        self.repo.reset(&object, ResetType::Hard, None)?;
        Ok(())
    }
}
