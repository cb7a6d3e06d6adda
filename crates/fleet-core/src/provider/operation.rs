//! Link, blueprint and template operations rooted at a target directory.
//!
//! ```yaml
//! provides:
//!   klipper-config:
//!     link: [macros.cfg]
//!     blueprint: [!PKG printer.cfg]
//!     template:
//!       - { source: moonraker.conf.tpl, target: moonraker.conf, only: { camera: true } }
//! ```
//!
//! Links are replaced whenever they point elsewhere. Blueprints and
//! templates are written once and never touched again so local edits
//! survive; the privileged template variant rewrites on content change.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_exec::Privileged;
use fleet_fs::{NormalizedPath, io};
use fleet_meta::{PathRef, SrcDst, Trigger};
use serde::Deserialize;

use super::{Provider, ProviderContext, decode};
use crate::lock::Entry;
use crate::progress::ProviderProgress;
use crate::settings::{OperationTarget, Settings};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Link,
    Blueprint,
    Template,
}

impl Group {
    pub const ALL: [Group; 3] = [Group::Link, Group::Blueprint, Group::Template];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Blueprint => "blueprint",
            Self::Template => "template",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == name)
    }

    /// Whether stale results are deleted rather than left in place.
    pub fn removable(self) -> bool {
        !matches!(self, Self::Blueprint)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationConfig {
    #[serde(default)]
    pub link: Vec<SrcDst>,
    #[serde(default)]
    pub blueprint: Vec<SrcDst>,
    #[serde(default)]
    pub template: Vec<SrcDst>,
}

impl OperationConfig {
    pub fn operations(&self, group: Group) -> &[SrcDst] {
        match group {
            Group::Link => &self.link,
            Group::Blueprint => &self.blueprint,
            Group::Template => &self.template,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationProvider {
    name: String,
    target: PathBuf,
    link_target: Option<PathBuf>,
    links_only: bool,
    privileged: Option<Privileged>,
    on_change: Vec<Trigger>,
    config: OperationConfig,
}

pub(crate) fn user_config(settings: &Settings) -> OperationProvider {
    OperationProvider {
        name: "user-config".into(),
        target: settings.config_root.clone(),
        link_target: None,
        links_only: false,
        privileged: None,
        on_change: Vec::new(),
        config: OperationConfig::default(),
    }
}

pub(crate) fn system_config(settings: &Settings) -> OperationProvider {
    OperationProvider {
        name: "system-config".into(),
        target: PathBuf::from("/"),
        link_target: None,
        links_only: false,
        privileged: Some(settings.privileged()),
        on_change: Vec::new(),
        config: OperationConfig::default(),
    }
}

fn present(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

impl OperationProvider {
    pub fn from_target(target: &OperationTarget) -> Self {
        Self {
            name: target.name.clone(),
            target: target.target.clone(),
            link_target: target.link_target.clone(),
            links_only: target.links_only,
            privileged: None,
            on_change: target.on_change.clone(),
            config: OperationConfig::default(),
        }
    }

    /// A copy carrying a manifest block. A bare list means links.
    pub fn configured(&self, config: Option<&serde_yaml::Value>) -> Result<Self> {
        let config = match config {
            Some(serde_yaml::Value::Sequence(_)) => OperationConfig {
                link: decode(&self.name, config)?,
                ..OperationConfig::default()
            },
            _ if self.links_only && config.is_some() => {
                return Err(Error::ProviderConfig {
                    provider: self.name.clone(),
                    message: "expected a list of links".into(),
                });
            }
            _ => decode(&self.name, config)?,
        };
        Ok(Self { config, ..self.clone() })
    }

    fn destination(&self, ctx: &ProviderContext<'_>, group: Group, target: &PathRef) -> Result<PathBuf> {
        if target.is_var() {
            return target
                .lookup(ctx.template)
                .map(PathBuf::from)
                .ok_or_else(|| Error::ProviderConfig {
                    provider: self.name.clone(),
                    message: format!("unknown variable '{}'", target.raw()),
                });
        }
        let base = match group {
            Group::Link => self.link_target.as_ref().unwrap_or(&self.target),
            _ => &self.target,
        };
        Ok(base.join(target.raw()))
    }

    /// Perform one operation; `true` when the destination changed.
    async fn handle(&self, group: Group, ctx: &ProviderContext<'_>, src: &Path, dst: &Path) -> Result<bool> {
        let (source, target) = (NormalizedPath::new(src), NormalizedPath::new(dst));
        let Some(privileged) = &self.privileged else {
            return match group {
                Group::Link if io::links_to(&target, &source) => Ok(false),
                Group::Link => {
                    io::replace_with_symlink(&source, &target)?;
                    Ok(true)
                }
                _ if present(dst) => Ok(false),
                Group::Blueprint => {
                    io::copy_tree(&source, &target)?;
                    Ok(true)
                }
                Group::Template => {
                    io::write_text(&target, &ctx.render_file(src)?)?;
                    Ok(true)
                }
            };
        };

        match group {
            Group::Link if io::links_to(&target, &source) => Ok(false),
            Group::Link => {
                if present(dst) {
                    privileged.rm_rf(dst).await?;
                } else if let Some(parent) = dst.parent() {
                    privileged.mkdir_p(parent).await?;
                }
                privileged.symlink(src, dst).await?;
                Ok(true)
            }
            Group::Blueprint if present(dst) => Ok(false),
            Group::Blueprint => {
                if let Some(parent) = dst.parent() {
                    privileged.mkdir_p(parent).await?;
                }
                privileged.copy(src, dst).await?;
                Ok(true)
            }
            Group::Template => {
                let rendered = ctx.render_file(src)?;
                if std::fs::read_to_string(dst).is_ok_and(|current| current == rendered) {
                    return Ok(false);
                }
                if let Some(parent) = dst.parent() {
                    privileged.mkdir_p(parent).await?;
                }
                privileged.write_file(&rendered, dst).await?;
                Ok(true)
            }
        }
    }

    async fn remove_output(&self, output: &str) -> Result<()> {
        let path = Path::new(output);
        match &self.privileged {
            Some(privileged) => privileged.rm_rf(path).await?,
            None if !path.is_absolute() => {
                return Err(Error::RelativeRemoval {
                    path: output.to_string(),
                });
            }
            None => {
                io::remove_any(&NormalizedPath::new(path))?;
            }
        }
        Ok(())
    }

    /// Delete or retain stale entries, depending on their group.
    async fn cleanup(&self, progress: &mut ProviderProgress, entries: Vec<Entry>) -> Result<()> {
        let mut scope = progress.scope();
        for entry in entries {
            let Some(group) = entry.group().and_then(Group::parse) else {
                continue;
            };
            let output = entry.output.clone().unwrap_or_default();
            let mut sub = scope.sub(group.as_str());
            let mut case = sub.case(output.clone());
            if !group.removable() {
                case.log_retained(&entry, "retained");
                continue;
            }
            if !output.is_empty() {
                self.remove_output(&output).await?;
            }
            case.log_removed(&entry, "removed");
        }
        Ok(())
    }

    fn notify_change(&self, progress: &mut ProviderProgress) {
        if progress.changed() {
            for trigger in &self.on_change {
                progress.notify(trigger.clone());
            }
        }
    }
}

#[async_trait]
impl Provider for OperationProvider {
    fn discriminator(&self) -> &str {
        &self.name
    }

    async fn apply(&self, ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()> {
        for group in Group::ALL {
            let available = self
                .config
                .operations(group)
                .iter()
                .filter(|op| op.predicate.available(ctx.options));
            for op in available {
                let src = ctx.source(&op.source);
                let dst = self.destination(ctx, group, &op.target)?;
                let label = format!("{} -> {}", ctx.short_source(&op.source), ctx.short_target(&dst));

                let existed = present(&dst);
                let changed = self.handle(group, ctx, &src, &dst).await?;

                let (input, output) = (Some(src.display().to_string()), Some(dst.display().to_string()));
                let mut scope = progress.scope();
                let mut sub = scope.sub(group.as_str());
                let mut case = sub.case(label);
                match (changed, existed) {
                    (true, true) => case.log_changed("updated", input, output),
                    (true, false) => case.log_changed("created", input, output),
                    (false, _) => case.log_unchanged("already exists", input, output),
                }
            }
        }

        let stale = progress.untouched();
        self.cleanup(progress, stale).await?;
        self.notify_change(progress);
        Ok(())
    }

    async fn remove(&self, _ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()> {
        let recorded = progress.all();
        self.cleanup(progress, recorded).await?;
        self.notify_change(progress);
        Ok(())
    }

    fn files(&self, ctx: &ProviderContext<'_>) -> Vec<PathBuf> {
        self.config
            .template
            .iter()
            .filter(|op| op.predicate.available(ctx.options))
            .map(|op| ctx.source(&op.source))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::lock::ProviderProvided;
    use crate::progress::testing::RecordingSink;
    use crate::provider::testing::{Fixture, progress};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn provider(fixture: &Fixture, yaml: &str) -> OperationProvider {
        let config: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        user_config(&fixture.settings).configured(Some(&config)).unwrap()
    }

    async fn run(provider: &OperationProvider, fixture: &Fixture, bucket: ProviderProvided) -> (ProviderProvided, bool, Vec<String>) {
        let sink = Arc::new(RecordingSink::default());
        let mut pp = progress(provider.discriminator(), bucket, sink.clone());
        provider.apply(&fixture.ctx(), &mut pp).await.unwrap();
        let changed = pp.changed();
        let (_, bucket, _) = pp.into_parts();
        (bucket, changed, sink.rendered())
    }

    #[tokio::test]
    async fn links_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let fixture = Fixture::new(dir.path());
        std::fs::write(fixture.package_dir.join("macros.cfg"), "[gcode_macro X]").unwrap();
        let provider = provider(&fixture, "link: [macros.cfg]");

        let (bucket, changed, lines) = run(&provider, &fixture, ProviderProvided::default()).await;
        assert!(changed);
        assert_eq!(lines, vec!["[user-config] [link] [<package>/macros.cfg -> macros.cfg] created"]);
        let link = fixture.settings.config_root.join("macros.cfg");
        assert_eq!(std::fs::read_link(&link).unwrap(), fixture.package_dir.join("macros.cfg"));

        let (again, changed, lines) = run(&provider, &fixture, bucket.clone()).await;
        assert!(!changed);
        assert_eq!(lines, vec!["[user-config] [link] [<package>/macros.cfg -> macros.cfg] already exists"]);
        assert_eq!(again, bucket);
    }

    #[tokio::test]
    async fn stale_links_go_and_blueprints_stay() {
        let dir = TempDir::new().unwrap();
        let fixture = Fixture::new(dir.path());
        for name in ["a.cfg", "b.cfg", "printer.cfg"] {
            std::fs::write(fixture.package_dir.join(name), name).unwrap();
        }

        let full = provider(&fixture, "link: [a.cfg, b.cfg]\nblueprint: [printer.cfg]");
        let (bucket, _, _) = run(&full, &fixture, ProviderProvided::default()).await;
        assert_eq!(bucket.len(), 3);

        let reduced = provider(&fixture, "link: [a.cfg]");
        let (bucket, changed, lines) = run(&reduced, &fixture, bucket).await;

        let root = &fixture.settings.config_root;
        assert!(changed);
        assert!(root.join("a.cfg").exists());
        assert!(!present(&root.join("b.cfg")));
        assert!(root.join("printer.cfg").exists());
        assert_eq!(bucket.len(), 1);
        assert!(lines.iter().any(|l| l.ends_with("retained")), "{lines:?}");
    }

    #[tokio::test]
    async fn retaining_a_blueprint_counts_as_a_change() {
        let dir = TempDir::new().unwrap();
        let fixture = Fixture::new(dir.path());
        for name in ["a.cfg", "printer.cfg"] {
            std::fs::write(fixture.package_dir.join(name), name).unwrap();
        }

        let full = provider(&fixture, "link: [a.cfg]\nblueprint: [printer.cfg]");
        let (bucket, _, _) = run(&full, &fixture, ProviderProvided::default()).await;

        let reduced = provider(&fixture, "link: [a.cfg]");
        let (bucket, changed, lines) = run(&reduced, &fixture, bucket).await;

        assert!(changed);
        assert_eq!(bucket.len(), 1);
        assert!(fixture.settings.config_root.join("printer.cfg").exists());
        assert!(lines.iter().any(|l| l.ends_with("retained")), "{lines:?}");
    }

    #[tokio::test]
    async fn blueprint_and_template_preserve_edits() {
        let dir = TempDir::new().unwrap();
        let fixture = Fixture::new(dir.path());
        std::fs::write(fixture.package_dir.join("printer.cfg"), "blueprint").unwrap();
        std::fs::write(fixture.package_dir.join("moonraker.tpl"), "venv = {{ dirs.venv }}").unwrap();
        let provider = provider(
            &fixture,
            "blueprint: [printer.cfg]\ntemplate: [[moonraker.tpl, moonraker.conf]]",
        );

        run(&provider, &fixture, ProviderProvided::default()).await;
        let root = &fixture.settings.config_root;
        assert_eq!(
            std::fs::read_to_string(root.join("moonraker.conf")).unwrap(),
            format!("venv = {}", fixture.venv_dir.display())
        );

        std::fs::write(root.join("printer.cfg"), "edited").unwrap();
        std::fs::write(root.join("moonraker.conf"), "edited").unwrap();
        let (_, changed, _) = run(&provider, &fixture, ProviderProvided::default()).await;
        assert!(!changed);
        assert_eq!(std::fs::read_to_string(root.join("printer.cfg")).unwrap(), "edited");
        assert_eq!(std::fs::read_to_string(root.join("moonraker.conf")).unwrap(), "edited");
        assert_eq!(provider.files(&fixture.ctx()), vec![fixture.package_dir.join("moonraker.tpl")]);
    }

    #[tokio::test]
    async fn predicates_select_operations() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        std::fs::write(fixture.package_dir.join("cam.cfg"), "").unwrap();
        let provider = provider(
            &fixture,
            "link:\n  - { source: cam.cfg, target: cam.cfg, only: { camera: true } }",
        );

        let (bucket, _, _) = run(&provider, &fixture, ProviderProvided::default()).await;
        assert!(bucket.is_empty());

        fixture.options.insert("camera".into(), serde_json::json!(true));
        let (bucket, _, _) = run(&provider, &fixture, ProviderProvided::default()).await;
        assert_eq!(bucket.len(), 1);
    }

    #[tokio::test]
    async fn changes_fire_target_triggers() {
        let dir = TempDir::new().unwrap();
        let fixture = Fixture::new(dir.path());
        std::fs::write(fixture.package_dir.join("ext.py"), "").unwrap();
        let target = fixture.settings.operation_target("klipper-extension").unwrap().clone();
        let config: serde_yaml::Value = serde_yaml::from_str("[ext.py]").unwrap();
        let provider = OperationProvider::from_target(&target)
            .configured(Some(&config))
            .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let mut pp = progress("klipper-extension", ProviderProvided::default(), sink);
        provider.apply(&fixture.ctx(), &mut pp).await.unwrap();
        let (_, bucket, outcome) = pp.into_parts();

        assert!(target.target.join("ext.py").is_symlink());
        assert_eq!(
            outcome.triggers,
            vec![Trigger::ServiceReload {
                service: "klipper.service".into(),
                restart: true,
                daemon_reload: false,
            }]
        );

        let mut pp = progress("klipper-extension", bucket, Arc::new(RecordingSink::default()));
        provider.remove(&fixture.ctx(), &mut pp).await.unwrap();
        assert!(!present(&target.target.join("ext.py")));
        assert!(pp.all().is_empty());
    }

    #[tokio::test]
    async fn relative_outputs_are_never_removed() {
        let dir = TempDir::new().unwrap();
        let fixture = Fixture::new(dir.path());
        let mut bucket = ProviderProvided::default();
        bucket.notice(Entry::new(vec!["link".into()], Some("a".into()), Some("relative/a".into())));

        let provider = provider(&fixture, "link: []");
        let mut pp = progress("user-config", bucket, Arc::new(RecordingSink::default()));
        let result = provider.apply(&fixture.ctx(), &mut pp).await;
        assert!(matches!(result, Err(Error::RelativeRemoval { .. })));
    }
}
