//! Release archives, typically a web UI published as a zip on GitHub.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_fs::{NormalizedPath, io};
use serde::Deserialize;
use tokio::task;

use super::{DataSource, github_project, local_version};
use crate::error::FetchError;
use crate::lock::{UNKNOWN_VERSION, Versioned};
use crate::progress::Breadcrumb;
use crate::{Error, Result};

const USER_AGENT: &str = concat!("fleet/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct ArchiveSource {
    path: PathBuf,
    url: String,
    release_api: String,
}

#[derive(Deserialize)]
struct Release {
    name: String,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>, url: impl Into<String>, release_api: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
            release_api: release_api.into().trim_end_matches('/').to_string(),
        }
    }

    fn is_remote(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }

    fn client(url: &str) -> std::result::Result<reqwest::Client, FetchError> {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::classify(url, e))
    }

    /// Name of the latest GitHub release.
    async fn latest_release(&self) -> std::result::Result<Option<String>, FetchError> {
        let Some((owner, name)) = github_project(&self.url) else {
            return Ok(None);
        };
        let url = format!("{}/repos/{owner}/{name}/releases/latest", self.release_api);
        let release: Release = Self::client(&url)?
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| FetchError::classify(&url, e))?
            .json()
            .await
            .map_err(|e| FetchError::classify(&url, e))?;
        Ok(Some(release.name))
    }

    async fn download(&self, version: &str) -> Result<Vec<u8>> {
        if !self.is_remote() {
            let path = self.url.trim_start_matches("file://");
            return Ok(tokio::fs::read(path).await?);
        }

        let url = match github_project(&self.url) {
            Some((owner, name)) => format!("https://github.com/{owner}/{name}/releases/download/{version}/{name}.zip"),
            None => self.url.clone(),
        };
        let bytes = Self::client(&url)?
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| FetchError::classify(&url, e))?
            .bytes()
            .await
            .map_err(|e| FetchError::classify(&url, e))?;
        Ok(bytes.to_vec())
    }
}

/// Extract into a staging directory beside `target`, then swap it in.
fn install(archive: Vec<u8>, target: &Path, version: &str) -> Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new().prefix(".fleet-staging-").tempdir_in(parent)?;

    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).map_err(|e| Error::archive(target, e))?;
    zip.extract(staging.path()).map_err(|e| Error::archive(target, e))?;

    if version != UNKNOWN_VERSION {
        std::fs::write(staging.path().join(".version"), format!("{version}\n"))?;
    }

    io::remove_any(&NormalizedPath::new(target))?;
    std::fs::rename(staging.path(), target)?;
    Ok(())
}

#[async_trait]
impl DataSource for ArchiveSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_change_history(&self) -> bool {
        false
    }

    async fn refresh(&self, record: &mut Versioned, log: &Breadcrumb) -> Result<()> {
        record.current_version = local_version(&self.path);
        record.remote_version = match self.latest_release().await {
            Ok(Some(version)) => version,
            Ok(None) => UNKNOWN_VERSION.to_string(),
            Err(e) => {
                log.warn(e.to_string());
                UNKNOWN_VERSION.to_string()
            }
        };
        record.commits_behind.clear();
        record.touch();
        Ok(())
    }

    async fn update(&self, record: &mut Versioned, log: &Breadcrumb) -> Result<bool> {
        let installed = self.path.exists() && record.current_version != UNKNOWN_VERSION;
        if installed && (record.is_up_to_date() || record.remote_version == UNKNOWN_VERSION) {
            return Ok(false);
        }

        let version = record.remote_version.clone();
        log.info(format!("Downloading {}...", self.url));
        let archive = self.download(&version).await?;

        let target = self.path.clone();
        task::spawn_blocking(move || install(archive, &target, &version)).await??;

        record.current_version = local_version(&self.path);
        if record.remote_version == UNKNOWN_VERSION {
            record.remote_version = record.current_version.clone();
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::sync::Arc;

    use super::*;
    use crate::progress::TracingSink;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in files {
            zip.start_file(*name, zip::write::SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn installs_local_archive_and_then_stays_put() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("mainsail.zip");
        write_zip(&zip_path, &[("index.html", "<html/>"), ("release_info.json", r#"{"version":"v2.9.0"}"#)]);

        let target = dir.path().join("packages/mainsail");
        let source = ArchiveSource::new(&target, zip_path.display().to_string(), "http://127.0.0.1:9");
        let log = Breadcrumb::new(Arc::new(TracingSink));
        let mut record = Versioned::default();

        assert!(source.update(&mut record, &log).await.unwrap());
        assert_eq!(std::fs::read_to_string(target.join("index.html")).unwrap(), "<html/>");
        assert_eq!(record.current_version, "v2.9.0");

        source.refresh(&mut record, &log).await.unwrap();
        assert_eq!(record.current_version, "v2.9.0");
        assert_eq!(record.remote_version, "?");
        assert!(!source.update(&mut record, &log).await.unwrap());
    }

    #[test]
    fn corrupt_archive_leaves_target_alone() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("pkg");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("keep"), "x").unwrap();

        let result = install(b"not a zip".to_vec(), &target, "v1");
        assert!(matches!(result, Err(Error::Archive { .. })));
        assert!(target.join("keep").exists());
    }
}
