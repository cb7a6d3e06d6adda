//! Data sources
//!
//! A data source discovers an entity's local and remote versions and
//! brings its files on disk up to date. Both operations tolerate a missing
//! network: an unreachable remote degrades to the unknown version `?`.

mod archive;
mod firmware;
mod git;
mod internal;
mod local;

pub use archive::ArchiveSource;
pub use firmware::FirmwareSource;
pub use git::GitSource;
pub use internal::InternalSource;
pub use local::LocalSource;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use fleet_meta::DataSourceSpec;
use regex::Regex;
use serde::Deserialize;

use crate::Result;
use crate::lock::{UNKNOWN_VERSION, Versioned};
use crate::progress::Breadcrumb;
use crate::settings::Settings;

static GIT_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:@|//)([^:/]+)[:/]([^:/]+)").expect("Invalid git host regex"));
static GIT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^:/]+?)(?:\.git)?/?$").expect("Invalid git name regex"));
static GITHUB_PROJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://github\.com/([^/]+)/([^/]+?)(?:\.git)?/?$").expect("Invalid GitHub project regex")
});

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Where the entity's files live.
    fn path(&self) -> &Path;

    /// Whether the origin has a commit history worth listing.
    fn has_change_history(&self) -> bool;

    /// Directory bundled manifests and `!PKG` references resolve against,
    /// when it is not [`path`](Self::path).
    fn package_path(&self) -> Option<&Path> {
        None
    }

    /// Recompute versions and backlog. Read-only apart from fetching.
    async fn refresh(&self, record: &mut Versioned, log: &Breadcrumb) -> Result<()>;

    /// Bring the files up to date; `true` when anything changed.
    async fn update(&self, record: &mut Versioned, log: &Breadcrumb) -> Result<bool>;
}

/// `<kind>-<host>-<owner>-<name>` for a repository URL, dots replaced.
pub fn url_slug(kind: &str, url: &str) -> String {
    let mut parts = vec![kind.to_string()];
    if let Some(caps) = GIT_HOST.captures(url) {
        parts.push(caps[1].to_string());
        parts.push(caps[2].to_string());
    }
    if let Some(caps) = GIT_NAME.captures(url) {
        parts.push(caps[1].to_string());
    }
    parts.join("-").replace('.', "-")
}

/// Last path segment of a URL without `.git`.
pub fn url_name(url: &str) -> Option<String> {
    GIT_NAME.captures(url).map(|caps| caps[1].to_string())
}

/// `(owner, name)` of a `https://github.com/<owner>/<name>` URL.
pub fn github_project(url: &str) -> Option<(String, String)> {
    GITHUB_PROJECT
        .captures(url)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

#[derive(Deserialize)]
struct ReleaseInfo {
    version: Option<String>,
}

/// Version of an unpacked release: `release_info.json` first, then a
/// `.version` file.
pub fn local_version(path: &Path) -> String {
    let from_release_info = std::fs::read_to_string(path.join("release_info.json"))
        .ok()
        .and_then(|content| serde_json::from_str::<ReleaseInfo>(&content).ok())
        .and_then(|info| info.version);
    from_release_info
        .or_else(|| {
            std::fs::read_to_string(path.join(".version"))
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

/// Build the data source for a spec whose files live at `path`.
pub fn from_spec(spec: &DataSourceSpec, path: PathBuf, settings: &Settings) -> Box<dyn DataSource> {
    match spec {
        DataSourceSpec::Git { url, branch } => Box::new(GitSource::new(path, url, branch)),
        DataSourceSpec::Zip { url } => Box::new(ArchiveSource::new(path, url, &settings.release_api)),
        DataSourceSpec::Local { .. } | DataSourceSpec::Internal { .. } => Box::new(LocalSource::new(path)),
    }
}
