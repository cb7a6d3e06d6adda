//! Async command execution with concurrent stream draining.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Variables inherited from the parent environment; everything else is
/// passed explicitly.
const INHERITED_ENV: &[&str] = &["HOME", "SHELL", "TERM", "PATH", "LANG"];

/// Which stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Prefix the command with `helper`, e.g. `sudo`.
    pub fn wrapped_in(self, helper: &Path) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: helper.to_string_lossy().into_owned(),
            args,
            cwd: self.cwd,
            env: self.env,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl Output {
    /// Stdout joined by newlines and trimmed.
    pub fn text(&self) -> String {
        self.stdout.join("\n").trim().to_string()
    }
}

/// Runs commands with a shared timeout policy.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run without streaming lines anywhere.
    pub async fn output(&self, cmd: &Cmd) -> Result<Output> {
        self.run(cmd, &mut |_, _| {}).await
    }

    /// Run `cmd`, forwarding every non-empty line to `sink` in arrival order.
    ///
    /// Carriage returns count as line breaks so progress meters surface as
    /// separate lines. A non-zero exit becomes [`Error::CommandFailed`]
    /// carrying the collected stderr.
    pub async fn run(&self, cmd: &Cmd, sink: &mut (dyn FnMut(Stream, &str) + Send)) -> Result<Output> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .env_clear()
            .envs(
                INHERITED_ENV
                    .iter()
                    .filter_map(|key| std::env::var(key).ok().map(|value| (*key, value))),
            )
            .envs(&cmd.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }

        tracing::debug!(command = %cmd, cwd = ?cmd.cwd, "running command");

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            command: cmd.to_string(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_lines(stdout, Stream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_lines(stderr, Stream::Stderr, tx.clone())));
        }
        drop(tx);

        let mut output = Output::default();
        let drain = async {
            while let Some((stream, line)) = rx.recv().await {
                sink(stream, &line);
                match stream {
                    Stream::Stdout => output.stdout.push(line),
                    Stream::Stderr => output.stderr.push(line),
                }
            }
            for reader in readers {
                let _ = reader.await;
            }
            child.wait().await
        };

        let status = match self.timeout {
            Some(limit) => {
                let finished = tokio::time::timeout(limit, drain).await;
                match finished {
                    Ok(status) => status,
                    Err(_) => {
                        if let Err(e) = child.kill().await {
                            tracing::warn!(command = %cmd, error = %e, "failed to kill timed out command");
                        }
                        return Err(Error::Timeout {
                            command: cmd.to_string(),
                            after: limit,
                        });
                    }
                }
            }
            None => drain.await,
        }
        .map_err(|source| Error::Spawn {
            command: cmd.to_string(),
            source,
        })?;

        if !status.success() {
            return Err(Error::CommandFailed {
                command: cmd.to_string(),
                cwd: cmd.cwd.clone(),
                env: cmd.env.clone(),
                code: status.code().unwrap_or(-1),
                stderr: output.stderr.join("\n"),
            });
        }

        Ok(output)
    }
}

async fn read_lines<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buffer);
                for line in text.split(['\r', '\n']).map(str::trim_end).filter(|l| !l.is_empty()) {
                    if tx.send((stream, line.to_string())).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "stream closed");
                break;
            }
        }
    }
}
