//! The host's dependency declaration file.
//!
//! ```yaml
//! requires:
//!   - git: https://github.com/acme/klipper-macros.git
//!     branch: main
//!     options: { camera: true }
//!   - internal: mainsail
//!     enabled: false
//! mcus:
//!   toolhead:
//!     preset: ebb36
//!     can-id: 0d3f2b1a9c44
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fleet_fs::{ConfigStore, NormalizedPath};
use serde_yaml::{Mapping, Value};

use crate::data_source::DataSourceSpec;
use crate::identifier::Identifier;
use crate::manifest::MANIFEST_FILE_NAMES;
use crate::options::Options;
use crate::{Error, Result};

/// One entry of `requires`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub source: DataSourceSpec,
    pub enabled: bool,
    pub options: Options,
}

impl Dependency {
    pub fn new(source: DataSourceSpec) -> Self {
        Self {
            source,
            enabled: true,
            options: Options::new(),
        }
    }

    pub fn identifier(&self) -> Identifier {
        Identifier::new(self.source.kind(), self.source.id())
    }

    fn from_value(value: &Value) -> Result<Self> {
        let Value::Mapping(map) = value else {
            return Err(Error::invalid("dependency", format!("expected a mapping, got {value:?}")));
        };
        Ok(Self {
            source: DataSourceSpec::from_mapping(map)?,
            enabled: map.get("enabled").and_then(Value::as_bool).unwrap_or(true),
            options: options(map)?,
        })
    }
}

/// How an MCU is reached for flashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McuMode {
    Can { can_id: String, interface: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct McuSpec {
    pub name: String,
    pub preset: String,
    /// The MCU hosting the main printer board configuration.
    pub main: bool,
    pub options: Options,
    pub mode: McuMode,
}

impl McuSpec {
    fn from_value(name: &str, value: &Value) -> Result<Self> {
        let Value::Mapping(map) = value else {
            return Err(Error::invalid("mcu", format!("'{name}' must be a mapping")));
        };
        let scalar = |key: &str| match map.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let preset = scalar("preset").ok_or_else(|| Error::invalid("mcu", format!("'{name}' has no preset")))?;
        let mode = match scalar("can-id") {
            Some(can_id) => McuMode::Can {
                can_id,
                interface: scalar("interface").unwrap_or_else(|| "can0".to_string()),
            },
            None => return Err(Error::unknown("mcu", value)),
        };
        Ok(Self {
            name: name.to_string(),
            preset,
            main: map.get("main").and_then(Value::as_bool).unwrap_or(false),
            options: options(map)?,
            mode,
        })
    }
}

fn options(map: &Mapping) -> Result<Options> {
    match map.get("options") {
        None | Some(Value::Null) => Ok(Options::new()),
        Some(value) => serde_yaml::from_value(value.clone()).map_err(|e| Error::invalid("options", e.to_string())),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changed {
    pub packages: Vec<Dependency>,
    pub mcus: Vec<McuSpec>,
}

impl Changed {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.mcus.is_empty()
    }
}

/// Result of re-reading the fleetfile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub added: Changed,
    pub removed: Changed,
}

#[derive(Debug, Clone)]
pub struct Fleetfile {
    path: PathBuf,
    requires: Vec<Dependency>,
    mcus: Vec<McuSpec>,
}

impl Fleetfile {
    /// Locate the fleetfile inside `dir`.
    pub fn find_in(dir: &Path) -> Result<PathBuf> {
        MANIFEST_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| Error::invalid("fleetfile", format!("no fleet.yml in {}", dir.display())))
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (requires, mcus) = Self::read(&path)?;
        Ok(Self { path, requires, mcus })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn requires(&self) -> &[Dependency] {
        &self.requires
    }

    pub fn mcus(&self) -> &[McuSpec] {
        &self.mcus
    }

    pub fn dependency(&self, identifier: &Identifier) -> Option<&Dependency> {
        self.requires.iter().find(|d| &d.identifier() == identifier)
    }

    /// Re-read the file, replacing the declared sets and reporting which
    /// packages and MCUs appeared or disappeared. Entries present in both
    /// take their new options and flags silently.
    pub fn update(&mut self) -> Result<Changes> {
        let (requires, mcus) = Self::read(&self.path)?;
        let mut changes = Changes::default();

        let old: BTreeMap<Identifier, &Dependency> = self.requires.iter().map(|d| (d.identifier(), d)).collect();
        let new: BTreeMap<Identifier, &Dependency> = requires.iter().map(|d| (d.identifier(), d)).collect();
        changes.added.packages = requires
            .iter()
            .filter(|d| !old.contains_key(&d.identifier()))
            .cloned()
            .collect();
        changes.removed.packages = self
            .requires
            .iter()
            .filter(|d| !new.contains_key(&d.identifier()))
            .cloned()
            .collect();

        let known = |list: &[McuSpec], name: &str| list.iter().any(|m| m.name == name);
        changes.added.mcus = mcus.iter().filter(|m| !known(&self.mcus, &m.name)).cloned().collect();
        changes.removed.mcus = self.mcus.iter().filter(|m| !known(&mcus, &m.name)).cloned().collect();

        self.requires = requires;
        self.mcus = mcus;
        tracing::debug!(
            path = %self.path.display(),
            added = changes.added.packages.len() + changes.added.mcus.len(),
            removed = changes.removed.packages.len() + changes.removed.mcus.len(),
            "fleetfile re-read"
        );
        Ok(changes)
    }

    fn read(path: &Path) -> Result<(Vec<Dependency>, Vec<McuSpec>)> {
        let data: Mapping = ConfigStore::new().load(&NormalizedPath::new(path))?;
        let requires = match data.get("requires") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(list)) => list.iter().map(Dependency::from_value).collect::<Result<_>>()?,
            Some(other) => return Err(Error::invalid("fleetfile", format!("'requires' must be a list, got {other:?}"))),
        };
        let mcus = match data.get("mcus") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Mapping(map)) => map
                .iter()
                .map(|(name, config)| {
                    let name = name
                        .as_str()
                        .ok_or_else(|| Error::invalid("mcu", format!("invalid name {name:?}")))?;
                    McuSpec::from_value(name, config)
                })
                .collect::<Result<_>>()?,
            Some(other) => return Err(Error::invalid("fleetfile", format!("'mcus' must be a mapping, got {other:?}"))),
        };
        Ok((requires, mcus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_identifier_uses_discriminator() {
        let dep = Dependency::new(DataSourceSpec::git("https://github.com/acme/macros.git"));
        assert_eq!(dep.identifier().to_string(), "git#https://github.com/acme/macros.git");
    }

    #[test]
    fn mcu_without_mode_is_rejected() {
        let value: Value = serde_yaml::from_str("preset: ebb36").unwrap();
        assert!(McuSpec::from_value("toolhead", &value).is_err());
    }

    #[test]
    fn numeric_can_id_is_kept_as_text() {
        let value: Value = serde_yaml::from_str("preset: ebb36\ncan-id: 1234").unwrap();
        let mcu = McuSpec::from_value("toolhead", &value).unwrap();
        assert_eq!(
            mcu.mode,
            McuMode::Can {
                can_id: "1234".into(),
                interface: "can0".into()
            }
        );
    }
}
