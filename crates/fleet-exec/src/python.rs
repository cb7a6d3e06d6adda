//! Virtualenv and pip helpers.

use std::collections::BTreeSet;
use std::path::Path;

use crate::{Cmd, CommandRunner, Result, Stream};

/// `virtualenv -p <python> <venv>`
pub async fn create_virtualenv(
    runner: &CommandRunner,
    python: &Path,
    venv: &Path,
    cwd: &Path,
    sink: &mut (dyn FnMut(Stream, &str) + Send),
) -> Result<()> {
    let cmd = Cmd::new("virtualenv")
        .arg("-p")
        .arg(python.to_string_lossy())
        .arg(venv.to_string_lossy())
        .cwd(cwd);
    runner.run(&cmd, sink).await.map(drop)
}

/// A pip invocation bound to `venv`.
pub fn pip(venv: &Path) -> Cmd {
    let bin = venv.join("bin");
    let path = match std::env::var("PATH") {
        Ok(existing) => format!("{}:{existing}", bin.display()),
        Err(_) => bin.display().to_string(),
    };
    Cmd::new(bin.join("pip").to_string_lossy())
        .env("VIRTUAL_ENV", venv.to_string_lossy())
        .env("PATH", path)
}

/// What `pip freeze` reports for a virtualenv.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Installed {
    /// Normalised distribution names
    pub packages: BTreeSet<String>,
    /// Paths of editable installs (`-e <path>` lines)
    pub editable: Vec<String>,
}

impl Installed {
    pub fn has_all<'a>(&self, requirements: impl IntoIterator<Item = &'a str>) -> bool {
        requirements
            .into_iter()
            .all(|requirement| self.packages.contains(&requirement_name(requirement)))
    }

    pub fn has_editable(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.editable.iter().any(|entry| entry.contains(path.as_ref()))
    }
}

pub async fn freeze(runner: &CommandRunner, venv: &Path, cwd: &Path) -> Result<Installed> {
    let output = runner.output(&pip(venv).arg("freeze").cwd(cwd)).await?;
    Ok(parse_freeze(&output.stdout))
}

pub fn parse_freeze<S: AsRef<str>>(lines: &[S]) -> Installed {
    let mut installed = Installed::default();
    for line in lines.iter().map(|l| l.as_ref().trim()) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(path) = line.strip_prefix("-e") {
            installed.editable.push(path.trim().to_string());
            continue;
        }
        installed.packages.insert(requirement_name(line));
    }
    installed
}

/// Requirement names listed in a requirements file, skipping options,
/// comments and environment markers.
pub fn parse_requirements(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .map(|line| line.split(';').next().unwrap_or(""))
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--") && !line.starts_with('-'))
        .map(requirement_name)
        .collect()
}

/// Distribution name of a requirement spec: lowercased, `_` as `-`,
/// version constraint and extras dropped.
pub fn requirement_name(spec: &str) -> String {
    let end = spec
        .find(['=', '<', '>', '~', '!', '[', ' ', '@'])
        .unwrap_or(spec.len());
    spec[..end].trim().to_lowercase().replace('_', "-")
}
