//! Commit backlog between a checkout and its upstream.
//!
//! The backlog is every commit reachable from the upstream tip but not from
//! the local one, newest first. Only the first [`MAX_COMMITS`] untagged
//! commits are kept; tagged commits are kept wherever they appear.

use std::collections::HashMap;

use git2::{DiffOptions, Oid, Sort};

use crate::{Checkout, Result, remote::version_order};

/// Untagged commits kept per backlog.
pub const MAX_COMMITS: usize = 30;

/// Information about a single upstream commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Full commit hash
    pub sha: String,
    pub author: String,
    /// Commit time, seconds since the epoch
    pub date: i64,
    /// First line of the message
    pub subject: String,
    /// Message body after the subject
    pub message: String,
    /// Tag pointing at this commit, if any
    pub tag: Option<String>,
}

impl Checkout {
    /// Number of commits in `from..to`.
    pub fn count_between(&self, from: Oid, to: Oid) -> Result<usize> {
        let mut walk = self.repo().revwalk()?;
        walk.push(to)?;
        walk.hide(from)?;

        let mut count = 0;
        for oid in walk {
            oid?;
            count += 1;
        }
        Ok(count)
    }

    /// Commits in `from..to`, newest first, annotated with tags.
    ///
    /// When `paths` is non-empty only commits touching one of those paths
    /// are listed.
    pub fn backlog(&self, from: Oid, to: Oid, paths: &[&str]) -> Result<Vec<CommitInfo>> {
        if self.count_between(from, to)? == 0 {
            return Ok(Vec::new());
        }

        let repo = self.repo();
        let tags = self.tags_descending_from(from)?;

        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push(to)?;
        walk.hide(from)?;

        let mut commits = Vec::new();
        let mut listed = 0usize;
        for oid in walk {
            let oid = oid?;
            if !paths.is_empty() && !self.touches(oid, paths)? {
                continue;
            }

            let tag = tags.get(&oid).cloned();
            if listed < MAX_COMMITS || tag.is_some() {
                commits.push(self.commit_info(oid, tag)?);
            }
            listed += 1;
        }

        tracing::debug!(
            path = %self.path().display(),
            listed,
            kept = commits.len(),
            "computed commit backlog"
        );
        Ok(commits)
    }

    fn commit_info(&self, oid: Oid, tag: Option<String>) -> Result<CommitInfo> {
        let commit = self.repo().find_commit(oid)?;
        let author = commit.author();

        Ok(CommitInfo {
            sha: oid.to_string(),
            author: author.name().unwrap_or("Unknown").to_string(),
            date: commit.time().seconds(),
            subject: commit.summary().unwrap_or("").trim().to_string(),
            message: commit.body().unwrap_or("").trim().to_string(),
            tag,
        })
    }

    /// Tags whose commit contains `base`, keyed by commit.
    ///
    /// When several tags point at one commit the highest version wins.
    fn tags_descending_from(&self, base: Oid) -> Result<HashMap<Oid, String>> {
        let repo = self.repo();
        let mut tags: HashMap<Oid, String> = HashMap::new();

        let names = repo.tag_names(None)?;
        for name in names.iter().flatten() {
            let Ok(object) = repo.revparse_single(&format!("refs/tags/{name}")) else {
                continue;
            };
            let Ok(commit) = object.peel_to_commit() else {
                continue;
            };
            let oid = commit.id();
            if oid != base && !repo.graph_descendant_of(oid, base)? {
                continue;
            }

            let replace = tags
                .get(&oid)
                .is_none_or(|existing| version_order(name, existing).is_gt());
            if replace {
                tags.insert(oid, name.to_string());
            }
        }

        Ok(tags)
    }

    /// True when `oid` changes any of `paths` relative to its first parent.
    fn touches(&self, oid: Oid, paths: &[&str]) -> Result<bool> {
        let repo = self.repo();
        let commit = repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(_) => None,
        };

        let mut options = DiffOptions::new();
        for path in paths {
            options.pathspec(*path);
        }
        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut options))?;
        Ok(diff.deltas().len() > 0)
    }
}
