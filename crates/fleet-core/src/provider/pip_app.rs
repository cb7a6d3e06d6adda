//! Python applications: a virtualenv, pip installs and systemd units.
//!
//! ```yaml
//! provides:
//!   pip-app:
//!     setup: true
//!     pip-requirements: !PKG requirements.txt
//!     pip-packages: [python-can]
//!     services:
//!       - [moonraker-timelapse.service.tpl, moonraker-timelapse.service]
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_exec::{ServiceAction, python};
use fleet_fs::{NormalizedPath, io};
use fleet_meta::{PathRef, SrcDst, Trigger};
use serde::Deserialize;

use super::{Provider, ProviderContext, decode};
use crate::Result;
use crate::lock::Entry;
use crate::progress::{Breadcrumb, ProviderProgress};

const NAME: &str = "pip-app";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PipAppConfig {
    /// `pip install --editable .` the package itself
    #[serde(default)]
    pub setup: bool,
    #[serde(default)]
    pub pip_requirements: Option<PathRef>,
    #[serde(default)]
    pub pip_packages: Vec<String>,
    /// Unit templates rendered into the systemd directory
    #[serde(default)]
    pub services: Vec<SrcDst>,
}

#[derive(Debug, Clone, Default)]
pub struct PipAppProvider {
    config: PipAppConfig,
}

fn text(path: &Path) -> Option<String> {
    Some(path.display().to_string())
}

fn output_sink(log: &Breadcrumb) -> impl FnMut(fleet_exec::Stream, &str) + Send + '_ {
    move |_, line| log.output(line)
}

impl PipAppProvider {
    pub fn new(config: PipAppConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: Option<&serde_yaml::Value>) -> Result<Self> {
        Ok(Self::new(decode(NAME, config)?))
    }

    fn wants_pip(&self) -> bool {
        self.config.setup || self.config.pip_requirements.is_some() || !self.config.pip_packages.is_empty()
    }

    async fn virtualenv(&self, ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()> {
        let venv = ctx.venv_dir;
        let present = venv.exists();
        if !present {
            progress.mark_installing();
        }

        let mut scope = progress.scope();
        let mut sub = scope.sub("virtualenv");
        if present {
            sub.log_unchanged("present", None, text(venv));
            return Ok(());
        }

        sub.info("creating virtualenv...");
        let log = sub.log().clone();
        python::create_virtualenv(
            &ctx.settings.runner(),
            &ctx.settings.python,
            venv,
            ctx.package_dir,
            &mut output_sink(&log),
        )
        .await?;
        sub.log_changed("created", None, text(venv));
        Ok(())
    }

    async fn pip(&self, ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()> {
        let (venv, pkg) = (ctx.venv_dir, ctx.package_dir);
        let runner = ctx.settings.runner();
        let mut scope = progress.scope();
        let mut pip = scope.sub("pip");

        if self.wants_pip() {
            let installed = python::freeze(&runner, venv, pkg).await?;

            if self.config.setup {
                let mut setup = pip.sub("setup");
                if installed.has_editable(pkg) {
                    setup.log_unchanged("up to date", text(pkg), text(venv));
                } else {
                    let log = setup.log().clone();
                    let cmd = python::pip(venv).args(["install", "--editable", "."]).cwd(pkg);
                    runner.run(&cmd, &mut output_sink(&log)).await?;
                    setup.log_changed("installed", text(pkg), text(venv));
                }
            }

            if !self.config.pip_packages.is_empty() {
                let mut packages = pip.sub("packages");
                let input = Some(self.config.pip_packages.join(" "));
                if installed.has_all(self.config.pip_packages.iter().map(String::as_str)) {
                    packages.log_unchanged("up to date", input, text(venv));
                } else {
                    let log = packages.log().clone();
                    let cmd = python::pip(venv).arg("install").args(self.config.pip_packages.iter().cloned()).cwd(pkg);
                    runner.run(&cmd, &mut output_sink(&log)).await?;
                    packages.log_changed("installed", input, text(venv));
                }
            }

            if let Some(reference) = &self.config.pip_requirements {
                let file = ctx.source(reference);
                let mut requirements = pip.sub("requirements");
                let content = io::read_text(&NormalizedPath::new(&file))?;
                let wanted = python::parse_requirements(&content);
                if installed.has_all(wanted.iter().map(String::as_str)) {
                    requirements.log_unchanged("up to date", text(&file), text(venv));
                } else {
                    let log = requirements.log().clone();
                    let cmd = python::pip(venv)
                        .args(["install", "-r"])
                        .arg(file.display().to_string())
                        .cwd(pkg);
                    runner.run(&cmd, &mut output_sink(&log)).await?;
                    requirements.log_changed("installed", text(&file), text(venv));
                }
            }
        }

        let stale: Vec<Entry> = pip
            .untouched()
            .into_iter()
            .filter(|entry| entry.group() == Some("pip"))
            .collect();
        for entry in stale {
            let label = entry.path.get(1).cloned().unwrap_or_default();
            pip.sub(&label).log_retained(&entry, "retained");
        }
        Ok(())
    }

    async fn services(&self, ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()> {
        let privileged = ctx.settings.privileged();
        if !self.config.services.is_empty() && !ctx.settings.systemd_dir.exists() {
            privileged.mkdir_p(&ctx.settings.systemd_dir).await?;
        }
        let mut scope = progress.scope();
        let mut services = scope.sub("service");

        let available = self
            .config
            .services
            .iter()
            .filter(|op| op.predicate.available(ctx.options));
        for op in available {
            let src = ctx.source(&op.source);
            let unit = op.target.raw().to_string();
            let dst = ctx.settings.systemd_dir.join(&unit);
            let rendered = ctx.render_file(&src)?;

            let mut case = services.case(unit.as_str());
            match std::fs::read_to_string(&dst) {
                Err(_) => {
                    privileged.write_file(&rendered, &dst).await?;
                    case.log_changed("installed", text(&src), text(&dst));
                    case.notify(Trigger::service_reload(unit.as_str()));
                }
                Ok(current) if current != rendered => {
                    privileged.write_file(&rendered, &dst).await?;
                    case.log_changed("updated", text(&src), text(&dst));
                    case.notify(Trigger::ServiceReload {
                        service: unit.clone(),
                        restart: true,
                        daemon_reload: true,
                    });
                }
                Ok(_) => case.log_unchanged("up to date", text(&src), text(&dst)),
            }
        }

        let stale: Vec<Entry> = services
            .untouched()
            .into_iter()
            .filter(|entry| entry.path == ["service"])
            .collect();
        for entry in stale {
            remove_unit(ctx, &entry).await?;
            let label = entry.output.clone().unwrap_or_default();
            services.case(label).log_removed(&entry, "removed");
        }
        Ok(())
    }
}

/// Stop a unit and delete its file. A unit that will not stop is only
/// warned about; it may never have been started.
async fn remove_unit(ctx: &ProviderContext<'_>, entry: &Entry) -> Result<()> {
    let Some(output) = &entry.output else {
        return Ok(());
    };
    let path = Path::new(output);
    let privileged = ctx.settings.privileged();
    if let Some(unit) = path.file_name().and_then(|n| n.to_str()) {
        if let Err(e) = privileged.systemctl(ServiceAction::Stop, unit, &mut |_, _| {}).await {
            tracing::warn!(unit, error = %e, "failed to stop service");
        }
    }
    privileged.rm_rf(path).await?;
    Ok(())
}

#[async_trait]
impl Provider for PipAppProvider {
    fn discriminator(&self) -> &str {
        NAME
    }

    async fn apply(&self, ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()> {
        self.virtualenv(ctx, progress).await?;
        self.pip(ctx, progress).await?;
        self.services(ctx, progress).await
    }

    async fn remove(&self, ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()> {
        let recorded = progress.all();
        let mut scope = progress.scope();
        for entry in recorded {
            match entry.group() {
                Some("service") => {
                    remove_unit(ctx, &entry).await?;
                    let label = entry.output.clone().unwrap_or_default();
                    scope.sub("service").case(label).log_removed(&entry, "removed");
                }
                Some("virtualenv") => {
                    if let Some(output) = &entry.output {
                        io::remove_any(&NormalizedPath::new(output))?;
                    }
                    scope.sub("virtualenv").log_removed(&entry, "removed");
                }
                Some(group) => {
                    let group = group.to_string();
                    scope.sub(&group).log_removed(&entry, "removing");
                }
                None => {}
            }
        }
        Ok(())
    }

    fn files(&self, ctx: &ProviderContext<'_>) -> Vec<PathBuf> {
        self.config
            .pip_requirements
            .iter()
            .map(|r| ctx.source(r))
            .chain(
                self.config
                    .services
                    .iter()
                    .filter(|op| op.predicate.available(ctx.options))
                    .map(|op| ctx.source(&op.source)),
            )
            .collect()
    }
}
