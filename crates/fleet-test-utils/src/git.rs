//! Git repository fixtures built with `git2`, no `git` CLI required.

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Oid, Repository, Signature};

/// A repository playing the role of a package's remote.
///
/// The default branch is always `main` regardless of the host's git config.
pub struct UpstreamRepo {
    path: PathBuf,
    repo: Repository,
}

impl UpstreamRepo {
    /// Initialise an empty repository at `path` with `main` as HEAD.
    ///
    /// # Panics
    /// Panics if the repository cannot be created.
    pub fn init(path: &Path) -> Self {
        fs::create_dir_all(path)
            .unwrap_or_else(|e| panic!("UpstreamRepo: failed to create {}: {e}", path.display()));
        let repo = Repository::init(path).unwrap_or_else(|e| {
            panic!("UpstreamRepo: failed to init repository at {}: {e}", path.display())
        });
        repo.set_head("refs/heads/main")
            .unwrap_or_else(|e| panic!("UpstreamRepo: failed to point HEAD at main: {e}"));
        Self {
            path: path.to_path_buf(),
            repo,
        }
    }

    /// Initialise and create a first commit containing `files`.
    pub fn with_files(path: &Path, files: &[(&str, &str)]) -> Self {
        let upstream = Self::init(path);
        for (name, content) in files {
            upstream.write(name, content);
        }
        upstream.commit_all("Initial commit");
        upstream
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remote URL usable by libgit2 (a plain local path).
    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Write a file into the working tree without committing.
    pub fn write(&self, name: &str, content: &str) {
        let file = self.path.join(name);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .unwrap_or_else(|e| panic!("UpstreamRepo: failed to create {}: {e}", parent.display()));
        }
        fs::write(&file, content)
            .unwrap_or_else(|e| panic!("UpstreamRepo: failed to write {}: {e}", file.display()));
    }

    /// Write `name` and commit it with `message`.
    pub fn commit_file(&self, name: &str, content: &str, message: &str) -> Oid {
        self.write(name, content);
        self.commit_all(message)
    }

    /// Stage everything in the working tree and commit on `main`.
    ///
    /// # Panics
    /// Panics if any git operation fails.
    pub fn commit_all(&self, message: &str) -> Oid {
        let mut index = self.repo.index().expect("index");
        index
            .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
            .expect("add_all");
        index.write().expect("index write");
        let tree_id = index.write_tree().expect("write_tree");
        let tree = self.repo.find_tree(tree_id).expect("find_tree");
        let signature = Signature::now("Test User", "test@test.com").expect("signature");

        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        self.repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .unwrap_or_else(|e| panic!("UpstreamRepo: commit '{message}' failed: {e}"))
    }

    /// Create a lightweight tag pointing at `oid`.
    pub fn tag(&self, name: &str, oid: Oid) {
        let object = self.repo.find_object(oid, None).expect("find_object");
        self.repo
            .tag_lightweight(name, &object, false)
            .unwrap_or_else(|e| panic!("UpstreamRepo: tag '{name}' failed: {e}"));
    }

    /// Create an annotated tag pointing at `oid`.
    pub fn annotated_tag(&self, name: &str, oid: Oid) {
        let object = self.repo.find_object(oid, None).expect("find_object");
        let signature = Signature::now("Test User", "test@test.com").expect("signature");
        self.repo
            .tag(name, &object, &signature, name, false)
            .unwrap_or_else(|e| panic!("UpstreamRepo: tag '{name}' failed: {e}"));
    }

    pub fn head(&self) -> Oid {
        self.repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map(|commit| commit.id())
            .expect("upstream has no commits")
    }
}

/// First eight hex digits of `oid`, the abbreviation used in versions.
pub fn short(oid: Oid) -> String {
    oid.to_string()[..8].to_string()
}
