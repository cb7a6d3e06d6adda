//! Distribution packages, e.g. `system-packages: { apt: [libusb-1.0-0] }`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use fleet_exec::Cmd;

use super::{Provider, ProviderContext, decode};
use crate::progress::ProviderProgress;
use crate::{Error, Result};

const NAME: &str = "system-packages";

/// Installs missing packages with the host's package manager. Packages are
/// never uninstalled; other software may depend on them.
#[derive(Debug, Clone)]
pub struct SystemPackagesProvider {
    manager: Option<String>,
    packages: Vec<String>,
}

impl SystemPackagesProvider {
    pub fn from_config(manager: Option<String>, config: Option<&serde_yaml::Value>) -> Result<Self> {
        let mut lists: BTreeMap<String, Vec<String>> = decode(NAME, config)?;
        let packages = match &manager {
            Some(manager) => lists.remove(manager).unwrap_or_default(),
            None if lists.values().any(|list| !list.is_empty()) => return Err(Error::UnsupportedPackageManager),
            None => Vec::new(),
        };
        Ok(Self { manager, packages })
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }
}

async fn is_installed(ctx: &ProviderContext<'_>, package: &str) -> bool {
    let query = Cmd::new("dpkg-query")
        .arg("--show")
        .arg("--showformat=${db:Status-Status}")
        .arg(package);
    match ctx.settings.runner().output(&query).await {
        Ok(output) => output.text() == "installed",
        Err(e) => {
            tracing::debug!(package, error = %e, "package query failed");
            false
        }
    }
}

#[async_trait]
impl Provider for SystemPackagesProvider {
    fn discriminator(&self) -> &str {
        NAME
    }

    async fn apply(&self, ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()> {
        let Some(manager) = &self.manager else {
            return Ok(());
        };
        if self.packages.is_empty() {
            return Ok(());
        }

        let mut missing = Vec::new();
        for package in &self.packages {
            if !is_installed(ctx, package).await {
                missing.push(package.clone());
            }
        }

        let log = progress.log().clone();
        let mut scope = progress.scope();
        if missing.is_empty() {
            for package in &self.packages {
                scope.case(package.as_str()).log_unchanged("up to date", None, Some(package.clone()));
            }
            return Ok(());
        }

        let install = Cmd::new(manager.as_str()).args(["install", "-y"]).args(missing.iter().cloned());
        ctx.settings
            .privileged()
            .run(install, &mut |_, line| log.output(line))
            .await?;
        for package in &self.packages {
            let mut case = scope.case(package.as_str());
            if missing.contains(package) {
                case.log_changed("installed", None, Some(package.clone()));
            } else {
                case.log_unchanged("up to date", None, Some(package.clone()));
            }
        }
        Ok(())
    }

    async fn remove(&self, _ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()> {
        let recorded = progress.all();
        let mut scope = progress.scope();
        for entry in recorded {
            let label = entry.output.clone().unwrap_or_default();
            scope.case(label).log_retained(&entry, "left installed");
        }
        Ok(())
    }

    fn files(&self, _ctx: &ProviderContext<'_>) -> Vec<PathBuf> {
        Vec::new()
    }
}
