//! Declarative post-update triggers.
//!
//! The variant set is closed, so triggers decode into a sum type keyed by
//! which discriminator field is present. Dispatch lives in fleet-core.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};

use crate::options::{Options, Predicate};
use crate::path_ref::PathRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// `service-reload: <unit>` with optional `restart` and `daemon-reload`.
    ServiceReload {
        service: String,
        restart: bool,
        daemon_reload: bool,
    },
    /// `shell: <script>`, run with `sh` in the package directory.
    Shell { command: PathRef, quiet: bool, sudo: bool },
    /// `message: <template>`
    Message { message: String },
    /// `gcode: <command>`
    Gcode { gcode: String },
}

impl Trigger {
    pub fn service_reload(service: impl Into<String>) -> Self {
        Self::ServiceReload {
            service: service.into(),
            restart: false,
            daemon_reload: false,
        }
    }

    pub fn discriminator(&self) -> &'static str {
        match self {
            Self::ServiceReload { .. } => "service-reload",
            Self::Shell { .. } => "shell",
            Self::Message { .. } => "message",
            Self::Gcode { .. } => "gcode",
        }
    }

    pub(crate) fn from_mapping(map: &Mapping) -> crate::Result<Self> {
        let flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);
        let text = |key: &str| -> crate::Result<String> {
            match map.get(key) {
                Some(Value::String(s)) => Ok(s.clone()),
                _ => Err(crate::Error::invalid("trigger", format!("'{key}' must be a string"))),
            }
        };

        if map.contains_key("service-reload") {
            Ok(Self::ServiceReload {
                service: text("service-reload")?,
                restart: flag("restart"),
                daemon_reload: flag("daemon-reload"),
            })
        } else if let Some(command) = map.get("shell") {
            Ok(Self::Shell {
                command: PathRef::from_value(command)?,
                quiet: flag("quiet"),
                sudo: flag("sudo"),
            })
        } else if map.contains_key("message") {
            Ok(Self::Message {
                message: text("message")?,
            })
        } else if map.contains_key("gcode") {
            Ok(Self::Gcode { gcode: text("gcode")? })
        } else {
            Err(crate::Error::unknown("trigger", &Value::Mapping(map.clone())))
        }
    }

    pub(crate) fn to_mapping(&self) -> Mapping {
        let mut map = Mapping::new();
        let flag = |map: &mut Mapping, key: &str, set: bool| {
            if set {
                map.insert(key.into(), Value::Bool(true));
            }
        };
        match self {
            Self::ServiceReload {
                service,
                restart,
                daemon_reload,
            } => {
                map.insert("service-reload".into(), service.as_str().into());
                flag(&mut map, "restart", *restart);
                flag(&mut map, "daemon-reload", *daemon_reload);
            }
            Self::Shell { command, quiet, sudo } => {
                map.insert("shell".into(), command.to_value());
                flag(&mut map, "quiet", *quiet);
                flag(&mut map, "sudo", *sudo);
            }
            Self::Message { message } => {
                map.insert("message".into(), message.as_str().into());
            }
            Self::Gcode { gcode } => {
                map.insert("gcode".into(), gcode.as_str().into());
            }
        }
        map
    }
}

impl Serialize for Trigger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_mapping().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Mapping::deserialize(deserializer)?;
        Self::from_mapping(&map).map_err(serde::de::Error::custom)
    }
}

/// A trigger guarded by `only`/`unless`.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestTrigger {
    pub trigger: Trigger,
    pub predicate: Predicate,
}

impl Serialize for ManifestTrigger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = self.trigger.to_mapping();
        let predicate = serde_yaml::to_value(&self.predicate).map_err(serde::ser::Error::custom)?;
        if let Value::Mapping(extra) = predicate {
            map.extend(extra);
        }
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ManifestTrigger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Mapping::deserialize(deserializer)?;
        let trigger = Trigger::from_mapping(&map).map_err(serde::de::Error::custom)?;
        let predicate = Predicate::from_mapping(&map).map_err(serde::de::Error::custom)?;
        Ok(Self { trigger, predicate })
    }
}

/// Which lifecycle events happened to an entity during one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Phase {
    pub installed: bool,
    pub updated: bool,
    pub removed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestTriggers {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub installed: Vec<ManifestTrigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<ManifestTrigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<ManifestTrigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub always: Vec<ManifestTrigger>,
}

impl ManifestTriggers {
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.updated.is_empty() && self.removed.is_empty() && self.always.is_empty()
    }

    /// Triggers to fire for `phase`, in declaration order. `always`
    /// entries are included regardless of phase.
    pub fn collect(&self, phase: Phase, options: &Options) -> Vec<Trigger> {
        [
            (phase.installed, &self.installed),
            (phase.updated, &self.updated),
            (phase.removed, &self.removed),
            (true, &self.always),
        ]
        .into_iter()
        .filter(|(active, _)| *active)
        .flat_map(|(_, list)| list.iter())
        .filter(|t| t.predicate.available(options))
        .map(|t| t.trigger.clone())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const TRIGGERS: &str = r#"
installed:
  - service-reload: moonraker
    restart: true
  - message: "Welcome {{ user }}"
updated:
  - shell: !PKG scripts/migrate.sh
    sudo: true
    only:
      migrate: true
always:
  - gcode: FIRMWARE_RESTART
    unless:
      headless: true
"#;

    #[test]
    fn decodes_all_trigger_kinds() {
        let triggers: ManifestTriggers = serde_yaml::from_str(TRIGGERS).unwrap();
        assert_eq!(
            triggers.installed[0].trigger,
            Trigger::ServiceReload {
                service: "moonraker".into(),
                restart: true,
                daemon_reload: false
            }
        );
        assert_eq!(
            triggers.updated[0].trigger,
            Trigger::Shell {
                command: PathRef::Package("scripts/migrate.sh".into()),
                quiet: false,
                sudo: true
            }
        );
        assert_eq!(triggers.always[0].trigger.discriminator(), "gcode");
        assert!(triggers.removed.is_empty());
    }

    #[test]
    fn collect_filters_phase_and_options() {
        let triggers: ManifestTriggers = serde_yaml::from_str(TRIGGERS).unwrap();
        let options: Options = serde_json::from_value(json!({"migrate": true})).unwrap();

        let updated = triggers.collect(
            Phase {
                updated: true,
                ..Phase::default()
            },
            &options,
        );
        assert_eq!(
            updated.iter().map(Trigger::discriminator).collect::<Vec<_>>(),
            vec!["shell", "gcode"]
        );

        let headless: Options = serde_json::from_value(json!({"headless": true})).unwrap();
        assert!(triggers.collect(Phase::default(), &headless).is_empty());
    }

    #[test]
    fn unknown_trigger_is_fatal() {
        let err = serde_yaml::from_str::<ManifestTriggers>("always:\n  - reboot: now\n").unwrap_err();
        assert!(err.to_string().contains("Unknown trigger"), "{err}");
    }

    #[test]
    fn reencodes_with_predicate() {
        let triggers: ManifestTriggers = serde_yaml::from_str(TRIGGERS).unwrap();
        let yaml = serde_yaml::to_string(&triggers).unwrap();
        let back: ManifestTriggers = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, triggers);
    }
}
