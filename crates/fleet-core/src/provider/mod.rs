//! Providers
//!
//! A provider turns one manifest `provides` block into filesystem and
//! service effects for one entity, records what it produced through its
//! [`ProviderProgress`] and cleans up whatever an earlier pass recorded but
//! the current configuration no longer produces.
//!
//! Providers are found through an explicit [`ProviderRegistry`]: a list of
//! discriminators with factories, filled with the built-ins at start-up.
//! External collaborators such as firmware flashing register their own.

mod operation;
mod pip_app;
mod system_packages;

pub use operation::{Group, OperationConfig, OperationProvider};
pub use pip_app::{PipAppConfig, PipAppProvider};
pub use system_packages::SystemPackagesProvider;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fleet_meta::{Options, PathRef};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::progress::ProviderProgress;
use crate::settings::Settings;
use crate::template::Renderer;
use crate::{Error, Result};

/// Everything a provider needs to know about the entity it works for.
pub struct ProviderContext<'a> {
    pub settings: &'a Settings,
    pub renderer: &'a dyn Renderer,
    /// Where the entity's files live
    pub package_dir: &'a Path,
    /// Where bundled manifests live, for internal packages
    pub package_path: Option<&'a Path>,
    pub venv_dir: &'a Path,
    pub options: &'a Options,
    /// Render context (`user`, `paths`, `dirs`, `options`)
    pub template: &'a Value,
}

impl ProviderContext<'_> {
    /// Absolute path of a source reference. `!PKG` references of internal
    /// packages resolve against the bundled package directory.
    pub fn source(&self, reference: &PathRef) -> PathBuf {
        match (reference, self.package_path) {
            (PathRef::Var(_), _) => reference
                .lookup(self.template)
                .map(PathBuf::from)
                .unwrap_or_else(|| self.package_dir.join(reference.raw())),
            (PathRef::Package(raw), Some(package_path)) => package_path.join(raw),
            _ => self.package_dir.join(reference.raw()),
        }
    }

    /// Short form of a source reference for progress labels.
    pub fn short_source(&self, reference: &PathRef) -> String {
        match (reference, self.package_path) {
            (PathRef::Package(raw), Some(_)) => format!("<internal>/{raw}"),
            (PathRef::Var(raw), _) => format!("!VAR {raw}"),
            (_, _) => format!("<package>/{}", reference.raw()),
        }
    }

    /// Render a source file against the entity context.
    pub fn render_file(&self, path: &Path) -> Result<String> {
        let template = std::fs::read_to_string(path).map_err(|e| fleet_fs::Error::io(path, e))?;
        Ok(self.renderer.render(&template, self.template))
    }

    /// Short form of a destination for progress labels.
    pub fn short_target(&self, path: &Path) -> String {
        path.strip_prefix(&self.settings.config_root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn discriminator(&self) -> &str;

    /// Apply the configuration and collect stale entries.
    async fn apply(&self, ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()>;

    /// Undo everything recorded in `progress`.
    async fn remove(&self, ctx: &ProviderContext<'_>, progress: &mut ProviderProgress) -> Result<()>;

    /// Source files whose content defines the result, for recipe hashing.
    fn files(&self, ctx: &ProviderContext<'_>) -> Vec<PathBuf>;
}

/// Builds a provider from its manifest configuration (`None` when the
/// manifest has no block for it).
pub type ProviderFactory = Arc<dyn Fn(Option<&serde_yaml::Value>) -> Result<Box<dyn Provider>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: Vec<(String, ProviderFactory)>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ProviderRegistry {
    /// The built-in providers for a host.
    pub fn builtin(settings: &Settings) -> Self {
        let mut registry = Self::default();

        let user = operation::user_config(settings);
        registry.register("user-config", move |config| Ok(Box::new(user.configured(config)?)));
        let system = operation::system_config(settings);
        registry.register("system-config", move |config| Ok(Box::new(system.configured(config)?)));
        for target in &settings.operation_targets {
            let provider = OperationProvider::from_target(target);
            registry.register(&target.name, move |config| Ok(Box::new(provider.configured(config)?)));
        }

        let manager = settings.package_manager.clone();
        registry.register("system-packages", move |config| {
            Ok(Box::new(SystemPackagesProvider::from_config(manager.clone(), config)?))
        });
        registry.register("pip-app", |config| Ok(Box::new(PipAppProvider::from_config(config)?)));
        registry
    }

    /// Add or replace a factory.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(Option<&serde_yaml::Value>) -> Result<Box<dyn Provider>> + Send + Sync + 'static,
    {
        let factory: ProviderFactory = Arc::new(factory);
        match self.factories.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((name.to_string(), factory)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(n, _)| n == name)
    }

    /// Discriminators in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|(n, _)| n.as_str())
    }

    pub fn build(&self, name: &str, config: Option<&serde_yaml::Value>) -> Result<Box<dyn Provider>> {
        let (_, factory) = self
            .factories
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| Error::UnknownProvider { name: name.to_string() })?;
        factory(config)
    }
}

/// Decode a provider block, `T::default()` when absent.
pub(crate) fn decode<T: DeserializeOwned + Default>(provider: &str, config: Option<&serde_yaml::Value>) -> Result<T> {
    match config {
        None | Some(serde_yaml::Value::Null) => Ok(T::default()),
        Some(value) => serde_yaml::from_value(value.clone()).map_err(|e| Error::ProviderConfig {
            provider: provider.to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::lock::ProviderProvided;
    use crate::progress::{Breadcrumb, ProgressSink, ProviderProgress};
    use crate::template::PlaceholderRenderer;

    /// A package checkout with a host layout under one temp root.
    pub struct Fixture {
        pub settings: Settings,
        pub package_dir: PathBuf,
        pub venv_dir: PathBuf,
        pub options: Options,
        pub template: Value,
    }

    impl Fixture {
        pub fn new(root: &Path) -> Self {
            let mut settings = Settings::rooted_at(&root.join("home"), &root.join("opt"), &root.join("venvs"));
            settings.systemd_dir = root.join("systemd");
            let package_dir = root.join("opt/pkg");
            let venv_dir = root.join("venvs/pkg");
            std::fs::create_dir_all(&package_dir).unwrap();
            let options = Options::new();
            let template = crate::template::context(&settings, &package_dir, &venv_dir, &options);
            Self {
                settings,
                package_dir,
                venv_dir,
                options,
                template,
            }
        }

        pub fn ctx(&self) -> ProviderContext<'_> {
            ProviderContext {
                settings: &self.settings,
                renderer: &PlaceholderRenderer,
                package_dir: &self.package_dir,
                package_path: None,
                venv_dir: &self.venv_dir,
                options: &self.options,
                template: &self.template,
            }
        }
    }

    pub fn progress(name: &str, bucket: ProviderProvided, sink: Arc<dyn ProgressSink>) -> ProviderProgress {
        ProviderProgress::new(name, bucket, Breadcrumb::new(sink).child(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_registry_covers_targets() {
        let settings = Settings::rooted_at(Path::new("/home/pi"), Path::new("/opt"), Path::new("/var/opt"));
        let registry = ProviderRegistry::builtin(&settings);
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec![
                "user-config",
                "system-config",
                "klipper-config",
                "moonraker-config",
                "klipper-extension",
                "moonraker-extension",
                "system-packages",
                "pip-app",
            ]
        );
        assert!(matches!(registry.build("flux-capacitor", None), Err(Error::UnknownProvider { .. })));
    }

    #[test]
    fn bad_configuration_is_reported_per_provider() {
        let settings = Settings::rooted_at(Path::new("/home/pi"), Path::new("/opt"), Path::new("/var/opt"));
        let registry = ProviderRegistry::builtin(&settings);
        let config: serde_yaml::Value = serde_yaml::from_str("setup: [not, a, bool]").unwrap();
        match registry.build("pip-app", Some(&config)) {
            Err(Error::ProviderConfig { provider, .. }) => assert_eq!(provider, "pip-app"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("configuration should be rejected"),
        }
    }
}
