//! Declared dependencies.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_fs::checksum::RecipeHasher;
use fleet_fs::{NormalizedPath, io};
use fleet_meta::{DataSourceSpec, Dependency, Manifest, Phase};
use serde_json::Value;

use super::{Mode, UpdateContext, Updatable, phase, pull, run_provider};
use crate::Result;
use crate::lock::{LockKey, Versioned};
use crate::progress::{Breadcrumb, EntityProgress, LineKind, TriggerOrigin};
use crate::provider::{Provider, ProviderContext};
use crate::settings::Settings;
use crate::source::{self, DataSource, InternalSource, LocalSource, url_name, url_slug};
use crate::template;

/// Hashed in place of file content that cannot be read yet.
const UNKNOWN_CONTENT: &str = "[UNKNOWN]";

/// One entry of the fleetfile's `requires`.
pub struct Package {
    dependency: Dependency,
    slug: String,
    source: Box<dyn DataSource>,
    /// Whether the files at the source path were put there by fleet
    owns_files: bool,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("identifier", &self.dependency.identifier())
            .field("slug", &self.slug)
            .field("path", &self.source.path())
            .finish()
    }
}

/// Slug and data source of an origin fleet downloads into `packages_dir`.
fn fetched(spec: &DataSourceSpec, settings: &Settings) -> (String, Box<dyn DataSource>) {
    let slug = url_slug(spec.kind(), spec.id());
    let source = source::from_spec(spec, settings.package_dir(&slug), settings);
    (slug, source)
}

impl Package {
    /// Resolve where a dependency lives. Bundled packages read their
    /// manifest here to find out where their payload comes from.
    pub fn new(dependency: Dependency, settings: &Settings) -> Result<Self> {
        let (slug, source, owns_files): (String, Box<dyn DataSource>, bool) = match &dependency.source {
            spec @ (DataSourceSpec::Git { .. } | DataSourceSpec::Zip { .. }) => {
                let (slug, source) = fetched(spec, settings);
                (slug, source, true)
            }
            spec @ DataSourceSpec::Local { path } => {
                let path = PathBuf::from(path);
                let slug = basename(&path).unwrap_or_else(|| spec.id().to_string());
                (slug, source::from_spec(spec, path, settings), false)
            }
            DataSourceSpec::Internal { name } => {
                let package_path = settings.internal_packages_dir.join(name);
                let manifest = Manifest::load(&package_path)?;
                let (slug, inner, owns_files): (String, Box<dyn DataSource>, bool) = match &manifest.data_source {
                    Some(spec @ (DataSourceSpec::Git { .. } | DataSourceSpec::Zip { .. })) => {
                        let (slug, source) = fetched(spec, settings);
                        (slug, source, true)
                    }
                    _ => (name.clone(), Box::new(LocalSource::new(&package_path)), false),
                };
                (slug, Box::new(InternalSource::new(inner, package_path)), owns_files)
            }
        };

        Ok(Self {
            dependency,
            slug,
            source,
            owns_files,
        })
    }

    pub fn dependency(&self) -> &Dependency {
        &self.dependency
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn path(&self) -> &Path {
        self.source.path()
    }

    pub fn source(&self) -> &dyn DataSource {
        self.source.as_ref()
    }

    /// Where the manifest lives: the bundle for internal packages, the
    /// checkout otherwise.
    fn manifest_dir(&self) -> &Path {
        self.source.package_path().unwrap_or_else(|| self.source.path())
    }

    pub fn manifest(&self) -> Result<Manifest> {
        Ok(Manifest::load(self.manifest_dir())?)
    }

    fn fallback_name(&self) -> String {
        match &self.dependency.source {
            DataSourceSpec::Git { url, .. } | DataSourceSpec::Zip { url } => {
                url_name(url).unwrap_or_else(|| self.slug.clone())
            }
            DataSourceSpec::Local { path } => basename(Path::new(path)).unwrap_or_else(|| self.slug.clone()),
            DataSourceSpec::Internal { name } => name.clone(),
        }
    }

    fn venv_dir(&self, settings: &Settings) -> PathBuf {
        settings.venv_dir(&self.slug)
    }

    fn template(&self, settings: &Settings) -> Value {
        template::context(settings, self.source.path(), &self.venv_dir(settings), &self.dependency.options)
    }

    fn providers(&self, cx: &UpdateContext<'_>, manifest: &Manifest) -> Result<Vec<Box<dyn Provider>>> {
        manifest
            .provider_names()
            .into_iter()
            .map(|name| cx.registry.build(name, manifest.provider_config(name)?))
            .collect()
    }

    /// sha256 over the manifest's defining sections and every tracked
    /// provider file.
    fn recipe_hash(&self, manifest: &Manifest, providers: &[Box<dyn Provider>], ctx: &ProviderContext<'_>) -> Result<String> {
        let mut hasher = RecipeHasher::new();
        for section in manifest.recipe_sections()? {
            hasher.section(&section);
        }
        for provider in providers {
            for file in provider.files(ctx) {
                if file.is_file() {
                    hasher.file(&file)?;
                } else {
                    hasher.section(UNKNOWN_CONTENT);
                }
            }
        }
        Ok(hasher.finish())
    }

    fn current_recipe(&self, cx: &UpdateContext<'_>) -> Result<String> {
        let manifest = self.manifest()?;
        let providers = self.providers(cx, &manifest)?;
        let venv = self.venv_dir(cx.settings);
        let template = self.template(cx.settings);
        let ctx = self.provider_context(cx, &venv, &template);
        self.recipe_hash(&manifest, &providers, &ctx)
    }

    fn provider_context<'a>(&'a self, cx: &UpdateContext<'a>, venv: &'a Path, template: &'a Value) -> ProviderContext<'a> {
        ProviderContext {
            settings: cx.settings,
            renderer: cx.renderer,
            package_dir: self.source.path(),
            package_path: self.source.package_path(),
            venv_dir: venv,
            options: &self.dependency.options,
            template,
        }
    }

    /// Recorded providers in reverse declaration order, followed by any
    /// the manifest no longer declares.
    fn removal_order(manifest: Option<&Manifest>, recorded: &[String]) -> Vec<String> {
        let mut order: Vec<String> = manifest
            .map(|m| m.provider_names())
            .unwrap_or_default()
            .into_iter()
            .rev()
            .filter(|name| recorded.iter().any(|r| r == name))
            .map(str::to_string)
            .collect();
        for name in recorded {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }
}

fn basename(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[async_trait]
impl Updatable for Package {
    fn key(&self) -> LockKey {
        LockKey::Package(self.dependency.identifier())
    }

    fn name(&self, cx: &UpdateContext<'_>) -> String {
        match self.manifest() {
            Ok(manifest) => {
                let name = manifest.name.clone().unwrap_or_else(|| self.fallback_name());
                cx.names.display_name(&name, Some(manifest.kind))
            }
            Err(_) => cx.names.display_name(&self.fallback_name(), None),
        }
    }

    fn origin(&self, cx: &UpdateContext<'_>) -> TriggerOrigin {
        let mut origin = TriggerOrigin::new(self.name(cx), self.source.path());
        origin.package_path = self.source.package_path().map(Path::to_path_buf);
        origin.context = self.template(cx.settings);
        origin
    }

    async fn refresh(&self, cx: &UpdateContext<'_>, record: &mut Versioned, log: &Breadcrumb) -> Result<()> {
        self.source.refresh(record, log).await?;
        if !self.source.has_change_history() {
            record.commits_behind.clear();
        }
        match self.current_recipe(cx) {
            Ok(hash) => record.recipe_hash_current = Some(hash),
            Err(e) => tracing::debug!(package = %self.slug, error = %e, "recipe not available"),
        }
        Ok(())
    }

    async fn update(&self, cx: &UpdateContext<'_>, progress: &mut EntityProgress<'_>) -> Result<()> {
        pull(self.source.as_ref(), progress).await?;

        let manifest = self.manifest()?;
        progress.set_origin(self.origin(cx));
        let providers = self.providers(cx, &manifest)?;
        let venv = self.venv_dir(cx.settings);
        let template = self.template(cx.settings);
        let ctx = self.provider_context(cx, &venv, &template);

        for provider in &providers {
            run_provider(provider.as_ref(), &ctx, progress, Mode::Apply).await?;
        }

        let declared: Vec<&str> = providers.iter().map(|p| p.discriminator()).collect();
        let stale: Vec<String> = progress
            .record()
            .provided
            .providers()
            .filter(|name| !declared.contains(name))
            .map(str::to_string)
            .collect();
        for name in stale {
            if !cx.registry.contains(&name) {
                progress
                    .log()
                    .warn(format!("Provider {name} is no longer available, keeping its records"));
                continue;
            }
            let provider = cx.registry.build(&name, None)?;
            run_provider(provider.as_ref(), &ctx, progress, Mode::Remove).await?;
        }

        let status = progress.status();
        for trigger in manifest.triggers.collect(phase(status), &self.dependency.options) {
            progress.notify(trigger);
        }

        let hash = self.recipe_hash(&manifest, &providers, &ctx)?;
        let record = progress.record();
        record.recipe_hash_installed = Some(hash.clone());
        record.recipe_hash_current = Some(hash);
        record.current_options = self.dependency.options.clone();
        record.commits_behind.clear();
        Ok(())
    }

    async fn remove(&self, cx: &UpdateContext<'_>, progress: &mut EntityProgress<'_>) -> Result<()> {
        progress.mark_removing();
        let manifest = match self.manifest() {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::debug!(package = %self.slug, error = %e, "removing without manifest");
                None
            }
        };
        progress.set_origin(self.origin(cx));

        let venv = self.venv_dir(cx.settings);
        let template = self.template(cx.settings);
        let ctx = self.provider_context(cx, &venv, &template);

        let recorded: Vec<String> = progress.record().provided.providers().map(str::to_string).collect();
        for name in Self::removal_order(manifest.as_ref(), &recorded) {
            if !cx.registry.contains(&name) {
                progress.log().warn(format!("Provider {name} is no longer available, dropping its records"));
                continue;
            }
            let config = match &manifest {
                Some(manifest) => manifest.provider_config(&name)?,
                None => None,
            };
            let provider = cx.registry.build(&name, config)?;
            run_provider(provider.as_ref(), &ctx, progress, Mode::Remove).await?;
        }

        if let Some(manifest) = &manifest {
            let removed = Phase {
                removed: true,
                ..Phase::default()
            };
            for trigger in manifest.triggers.collect(removed, &self.dependency.options) {
                progress.notify(trigger);
            }
        }

        if self.owns_files && io::remove_any(&NormalizedPath::new(self.source.path()))? {
            progress.log().emit(LineKind::Removed, "Removed files");
        }
        Ok(())
    }
}
