//! Filesystem and service operations through an elevated helper.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Cmd, CommandRunner, Error, Output, Result, Stream};

/// `systemctl` verbs used on units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Reload,
    Restart,
    Enable,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reload => "reload",
            Self::Restart => "restart",
            Self::Enable => "enable",
        }
    }
}

/// Runs commands through the privileged helper (`sudo` by default).
#[derive(Debug, Clone)]
pub struct Privileged {
    runner: CommandRunner,
    helper: PathBuf,
}

impl Privileged {
    pub fn new(runner: CommandRunner, helper: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            helper: helper.into(),
        }
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub async fn run(&self, cmd: Cmd, sink: &mut (dyn FnMut(Stream, &str) + Send)) -> Result<Output> {
        self.runner.run(&cmd.wrapped_in(&self.helper), sink).await
    }

    pub async fn mkdir_p(&self, path: &Path) -> Result<()> {
        self.run(Cmd::new("mkdir").args(["-p", "-v"]).arg(path_arg(path)), &mut |_, _| {})
            .await
            .map(drop)
    }

    pub async fn rm_rf(&self, path: &Path) -> Result<()> {
        self.run(Cmd::new("rm").args(["-r", "-f", "-v"]).arg(path_arg(path)), &mut |_, _| {})
            .await
            .map(drop)
    }

    /// `ln -s -f <source> <target>`
    pub async fn symlink(&self, source: &Path, target: &Path) -> Result<()> {
        self.run(
            Cmd::new("ln").args(["-s", "-f"]).arg(path_arg(source)).arg(path_arg(target)),
            &mut |_, _| {},
        )
        .await
        .map(drop)
    }

    pub async fn copy(&self, source: &Path, target: &Path) -> Result<()> {
        self.run(
            Cmd::new("cp").args(["-r", "-v"]).arg(path_arg(source)).arg(path_arg(target)),
            &mut |_, _| {},
        )
        .await
        .map(drop)
    }

    /// Write `content` to `target` via a world-readable temp file and `cp`.
    pub async fn write_file(&self, content: &str, target: &Path) -> Result<()> {
        let mut temp = tempfile::NamedTempFile::new().map_err(|e| Error::io(std::env::temp_dir(), e))?;
        temp.write_all(content.as_bytes())
            .map_err(|e| Error::io(temp.path(), e))?;
        temp.flush().map_err(|e| Error::io(temp.path(), e))?;
        set_readable(temp.path())?;

        self.run(
            Cmd::new("cp").arg(path_arg(temp.path())).arg(path_arg(target)),
            &mut |_, _| {},
        )
        .await
        .map(drop)
    }

    pub async fn systemctl(
        &self,
        action: ServiceAction,
        unit: &str,
        sink: &mut (dyn FnMut(Stream, &str) + Send),
    ) -> Result<()> {
        self.run(Cmd::new("systemctl").arg(action.as_str()).arg(unit), sink)
            .await
            .map(drop)
    }

    pub async fn daemon_reload(&self) -> Result<()> {
        self.run(Cmd::new("systemctl").arg("daemon-reload"), &mut |_, _| {})
            .await
            .map(drop)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(unix)]
fn set_readable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn set_readable(_path: &Path) -> Result<()> {
    Ok(())
}
