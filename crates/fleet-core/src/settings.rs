//! Host paths and tunables.
//!
//! Loaded from a TOML, YAML or JSON file by extension; every field has a
//! default so an absent file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_exec::{CommandRunner, Privileged};
use fleet_fs::{ConfigStore, NormalizedPath};
use fleet_meta::Trigger;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A named link/blueprint/template provider rooted at `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationTarget {
    /// Provider discriminator used in manifests
    pub name: String,
    pub target: PathBuf,
    /// Where `link` operations land instead of `target`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<PathBuf>,
    /// The configuration is a bare list of links
    #[serde(default)]
    pub links_only: bool,
    /// Fired when the provider changed or removed anything
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_change: Vec<Trigger>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub config_root: PathBuf,
    pub packages_dir: PathBuf,
    pub venvs_dir: PathBuf,
    pub internal_packages_dir: PathBuf,
    pub firmware_dir: PathBuf,
    /// Klipper tree MCU firmware is built from
    pub firmware_checkout: PathBuf,
    pub self_dir: PathBuf,
    /// Restarted after fleet updated itself
    pub host_service: String,
    pub python: PathBuf,
    pub privileged_helper: PathBuf,
    /// Where `pip-app` installs systemd units
    pub systemd_dir: PathBuf,
    pub package_manager: Option<String>,
    pub command_timeout_secs: u64,
    pub release_api: String,
    pub control_pipe: PathBuf,
    pub debounce_ms: u64,
    pub operation_targets: Vec<OperationTarget>,
    /// Providers applied to every MCU, registered by the flashing tool
    pub mcu_providers: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        Self::rooted_at(&home, Path::new("/opt"), Path::new("/var/opt"))
    }
}

impl Settings {
    /// Defaults relative to a home directory and install roots.
    pub fn rooted_at(config_root: &Path, packages_dir: &Path, venvs_dir: &Path) -> Self {
        let self_dir = packages_dir.join("fleet");
        let restart = |service: &str| Trigger::ServiceReload {
            service: service.to_string(),
            restart: true,
            daemon_reload: false,
        };
        let operation_targets = vec![
            OperationTarget {
                name: "klipper-config".into(),
                target: config_root.join("config"),
                link_target: Some(config_root.join("autoload-klipper")),
                links_only: false,
                on_change: vec![Trigger::Gcode {
                    gcode: "FIRMWARE_RESTART".into(),
                }],
            },
            OperationTarget {
                name: "moonraker-config".into(),
                target: config_root.join("config"),
                link_target: Some(config_root.join("autoload-moonraker")),
                links_only: false,
                on_change: vec![restart("moonraker.service")],
            },
            OperationTarget {
                name: "klipper-extension".into(),
                target: packages_dir.join("klipper/klippy/extras"),
                link_target: None,
                links_only: true,
                on_change: vec![restart("klipper.service")],
            },
            OperationTarget {
                name: "moonraker-extension".into(),
                target: packages_dir.join("moonraker/moonraker/components"),
                link_target: None,
                links_only: true,
                on_change: vec![restart("moonraker.service")],
            },
        ];

        Self {
            config_root: config_root.to_path_buf(),
            packages_dir: packages_dir.to_path_buf(),
            venvs_dir: venvs_dir.to_path_buf(),
            internal_packages_dir: self_dir.join("internal-packages"),
            firmware_dir: config_root.join("firmware"),
            firmware_checkout: packages_dir.join("klipper"),
            self_dir,
            host_service: "moonraker.service".into(),
            python: PathBuf::from("/usr/bin/python3"),
            privileged_helper: PathBuf::from("/usr/bin/sudo"),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            package_manager: Path::new("/usr/bin/apt").exists().then(|| "apt".to_string()),
            command_timeout_secs: 900,
            release_api: "https://api.github.com".into(),
            control_pipe: PathBuf::from("/run/klipper/klippy.serial"),
            debounce_ms: 2000,
            operation_targets,
            mcu_providers: Vec::new(),
        }
    }

    /// Load settings, falling back to defaults when `path` is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(ConfigStore::new().load_or_default(&NormalizedPath::new(path))?),
            None => Ok(Self::default()),
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    pub fn runner(&self) -> CommandRunner {
        CommandRunner::new(self.command_timeout())
    }

    pub fn privileged(&self) -> Privileged {
        Privileged::new(self.runner(), &self.privileged_helper)
    }

    pub fn package_dir(&self, slug: &str) -> PathBuf {
        self.packages_dir.join(slug)
    }

    pub fn venv_dir(&self, slug: &str) -> PathBuf {
        self.venvs_dir.join(slug)
    }

    pub fn self_venv(&self) -> PathBuf {
        self.venv_dir("fleet")
    }

    /// The lock file kept next to a fleetfile.
    pub fn lock_path_for(fleetfile: &Path) -> PathBuf {
        fleetfile
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".fleet.lock")
    }

    pub fn operation_target(&self, name: &str) -> Option<&OperationTarget> {
        self.operation_targets.iter().find(|t| t.name == name)
    }
}
