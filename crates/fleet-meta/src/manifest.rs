//! Package manifest (`fleet.yml`) decoding.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fleet_fs::{ConfigStore, NormalizedPath};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

use crate::data_source::DataSourceSpec;
use crate::trigger::ManifestTriggers;
use crate::{Error, Result};

pub const MANIFEST_FILE_NAMES: [&str; 2] = ["fleet.yml", "fleet.yaml"];

/// Locate the manifest inside `dir`.
pub fn find_manifest(dir: &Path) -> Result<PathBuf> {
    let found = MANIFEST_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file());
    match found {
        Some(path) => {
            tracing::debug!(path = %path.display(), "found manifest");
            Ok(path)
        }
        None => {
            tracing::debug!(dir = %dir.display(), "no manifest");
            Err(Error::ManifestNotFound {
                path: dir.to_path_buf(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Service,
    Config,
    Extension,
    #[default]
    Package,
}

impl PackageType {
    /// Display prefix for the type, `None` for plain packages.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::Service => Some("Service"),
            Self::Config => Some("Config"),
            Self::Extension => Some("Extension"),
            Self::Package => None,
        }
    }
}

/// One `provides` block: provider discriminator to its raw configuration.
///
/// Configurations stay untyped here; the provider registry decodes them
/// and rejects unknown discriminators.
pub type ProvidesBlock = BTreeMap<String, Value>;

fn default_license() -> String {
    "UNKNOWN".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "default_license")]
    pub license: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSourceSpec>,
    #[serde(default, deserialize_with = "provides_blocks")]
    pub provides: Vec<ProvidesBlock>,
    #[serde(default, skip_serializing_if = "ManifestTriggers::is_empty")]
    pub triggers: ManifestTriggers,
}

fn provides_blocks<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<ProvidesBlock>, D::Error> {
    use serde::de::Error as _;

    let block = |value: Value| serde_yaml::from_value::<ProvidesBlock>(value).map_err(D::Error::custom);
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(blocks) => blocks.into_iter().map(block).collect(),
        single => Ok(vec![block(single)?]),
    }
}

impl Manifest {
    /// Load the manifest found in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = find_manifest(dir)?;
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        Ok(ConfigStore::new().load(&NormalizedPath::new(path))?)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::invalid("manifest", e.to_string()))
    }

    /// Configuration of `provider` across all blocks.
    ///
    /// Declaring the same provider twice is an error.
    pub fn provider_config(&self, provider: &str) -> Result<Option<&Value>> {
        let mut found = self.provides.iter().filter_map(|block| block.get(provider));
        let first = found.next();
        if found.next().is_some() {
            return Err(Error::invalid(
                "manifest",
                format!("provider '{provider}' is declared more than once"),
            ));
        }
        Ok(first)
    }

    /// Provider discriminators in declaration order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.provides
            .iter()
            .flat_map(|block| block.keys())
            .map(String::as_str)
            .collect()
    }

    /// Canonical YAML of the sections that define what the package does,
    /// in a stable order for recipe hashing.
    pub fn recipe_sections(&self) -> Result<Vec<String>> {
        Ok(vec![
            to_yaml(&self.data_source)?,
            to_yaml(&self.provides)?,
            to_yaml(&self.triggers)?,
        ])
    }
}

fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| Error::invalid("manifest", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn find_manifest_prefers_yml_and_reports_absence() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(find_manifest(dir.path()), Err(Error::ManifestNotFound { .. })));

        std::fs::write(dir.path().join("fleet.yaml"), "name: a\n").unwrap();
        assert_eq!(find_manifest(dir.path()).unwrap(), dir.path().join("fleet.yaml"));

        std::fs::write(dir.path().join("fleet.yml"), "name: a\n").unwrap();
        assert_eq!(find_manifest(dir.path()).unwrap(), dir.path().join("fleet.yml"));
    }

    const MANIFEST: &str = r#"
name: klipper-macros
author: acme
type: config
data-source:
  git: https://github.com/acme/klipper-macros.git
  branch: main
provides:
  user-config:
    link:
      - macros.cfg
triggers:
  updated:
    - service-reload: klipper
"#;

    #[test]
    fn decodes_manifest() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("klipper-macros"));
        assert_eq!(manifest.license, "UNKNOWN");
        assert_eq!(manifest.kind, PackageType::Config);
        assert_eq!(manifest.provider_names(), vec!["user-config"]);
        assert!(manifest.provider_config("user-config").unwrap().is_some());
        assert!(manifest.provider_config("pip-app").unwrap().is_none());
        assert_eq!(manifest.triggers.updated.len(), 1);
    }

    #[test]
    fn provides_accepts_a_list() {
        let manifest = Manifest::parse("provides:\n  - user-config: {}\n  - system-packages: [curl]\n").unwrap();
        assert_eq!(manifest.provider_names(), vec!["user-config", "system-packages"]);
        assert_eq!(manifest.kind, PackageType::Package);
    }

    #[test]
    fn duplicate_provider_is_rejected() {
        let manifest = Manifest::parse("provides:\n  - user-config: {}\n  - user-config: {}\n").unwrap();
        assert!(manifest.provider_config("user-config").is_err());
    }

    #[test]
    fn recipe_sections_follow_content() {
        let a = Manifest::parse(MANIFEST).unwrap();
        let mut b = a.clone();
        b.name = Some("renamed".into());
        assert_eq!(a.recipe_sections().unwrap(), b.recipe_sections().unwrap());

        b.triggers.updated.clear();
        assert!(a.recipe_sections().unwrap() != b.recipe_sections().unwrap());
    }
}
