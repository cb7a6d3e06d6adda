//! MCU firmware.

use std::path::PathBuf;

use async_trait::async_trait;
use fleet_git::Checkout;
use fleet_meta::{McuMode, McuSpec, Trigger};
use serde_yaml::{Mapping, Value};
use tokio::task;

use super::{Mode, UpdateContext, Updatable, pull, run_provider};
use crate::Result;
use crate::lock::{LockKey, Versioned};
use crate::progress::{Breadcrumb, EntityProgress, LineKind, TriggerOrigin};
use crate::provider::{Provider, ProviderContext};
use crate::source::{DataSource, FirmwareSource};
use crate::template;

/// One MCU from the fleetfile.
///
/// Flashing is done by providers registered by an external tool and named
/// in `Settings::mcu_providers`; each receives the MCU declaration as its
/// configuration.
#[derive(Debug, Clone)]
pub struct Mcu {
    spec: McuSpec,
    source: FirmwareSource,
}

impl Mcu {
    pub fn new(spec: McuSpec, checkout: impl Into<PathBuf>, firmware_dir: impl Into<PathBuf>) -> Self {
        let output = firmware_dir.into().join(&spec.name);
        Self {
            source: FirmwareSource::new(checkout, output),
            spec,
        }
    }

    pub fn spec(&self) -> &McuSpec {
        &self.spec
    }

    /// The declaration handed to flashing providers.
    fn provider_config(&self) -> Result<Value> {
        let mut config = Mapping::new();
        config.insert("name".into(), self.spec.name.clone().into());
        config.insert("preset".into(), self.spec.preset.clone().into());
        config.insert("main".into(), self.spec.main.into());
        config.insert(
            "options".into(),
            serde_yaml::to_value(&self.spec.options).map_err(|e| crate::Error::ProviderConfig {
                provider: "mcu".into(),
                message: e.to_string(),
            })?,
        );
        match &self.spec.mode {
            McuMode::Can { can_id, interface } => {
                config.insert("can-id".into(), can_id.clone().into());
                config.insert("interface".into(), interface.clone().into());
            }
        }
        Ok(Value::Mapping(config))
    }

    fn providers(&self, cx: &UpdateContext<'_>) -> Result<Vec<Box<dyn Provider>>> {
        let config = self.provider_config()?;
        cx.settings
            .mcu_providers
            .iter()
            .map(|name| cx.registry.build(name, Some(&config)))
            .collect()
    }
}

async fn describe(checkout: PathBuf) -> Result<String> {
    let version = task::spawn_blocking(move || Checkout::open(&checkout)?.describe_workdir()).await??;
    Ok(version)
}

#[async_trait]
impl Updatable for Mcu {
    fn key(&self) -> LockKey {
        LockKey::Mcu(self.spec.name.clone())
    }

    fn name(&self, cx: &UpdateContext<'_>) -> String {
        format!("MCU :: {}", cx.names.display_name(&self.spec.name, None))
    }

    fn origin(&self, cx: &UpdateContext<'_>) -> TriggerOrigin {
        let mut origin = TriggerOrigin::new(self.name(cx), self.source.checkout());
        origin.context = template::context(
            cx.settings,
            self.source.checkout(),
            &cx.settings.venv_dir("klipper"),
            &self.spec.options,
        );
        origin
    }

    async fn refresh(&self, _cx: &UpdateContext<'_>, record: &mut Versioned, log: &Breadcrumb) -> Result<()> {
        self.source.refresh(record, log).await
    }

    async fn update(&self, cx: &UpdateContext<'_>, progress: &mut EntityProgress<'_>) -> Result<()> {
        pull(&self.source, progress).await?;

        let providers = self.providers(cx)?;
        if providers.is_empty() {
            progress.log().warn("No firmware provider registered, skipping");
            return Ok(());
        }
        let record = progress.record();
        if record.is_up_to_date() && !record.options_dirty(&self.spec.options) {
            return Ok(());
        }

        progress.mark_changed();
        let venv = cx.settings.venv_dir("klipper");
        let template = template::context(cx.settings, self.source.checkout(), &venv, &self.spec.options);
        let ctx = ProviderContext {
            settings: cx.settings,
            renderer: cx.renderer,
            package_dir: self.source.checkout(),
            package_path: None,
            venv_dir: &venv,
            options: &self.spec.options,
            template: &template,
        };
        for provider in &providers {
            run_provider(provider.as_ref(), &ctx, progress, Mode::Apply).await?;
        }

        let version = describe(self.source.checkout().to_path_buf()).await?;
        progress.log().emit(LineKind::Changed, format!("Flashed {version}"));
        let record = progress.record();
        record.current_version = version.clone();
        record.remote_version = version;
        record.current_options = self.spec.options.clone();
        record.commits_behind.clear();
        progress.notify(Trigger::Gcode {
            gcode: "FIRMWARE_RESTART".into(),
        });
        Ok(())
    }

    async fn remove(&self, cx: &UpdateContext<'_>, progress: &mut EntityProgress<'_>) -> Result<()> {
        progress.mark_removing();
        let providers = self.providers(cx)?;
        let venv = cx.settings.venv_dir("klipper");
        let template = template::context(cx.settings, self.source.checkout(), &venv, &self.spec.options);
        let ctx = ProviderContext {
            settings: cx.settings,
            renderer: cx.renderer,
            package_dir: self.source.checkout(),
            package_path: None,
            venv_dir: &venv,
            options: &self.spec.options,
            template: &template,
        };
        for provider in providers.iter().rev() {
            run_provider(provider.as_ref(), &ctx, progress, Mode::Remove).await?;
        }
        Ok(())
    }
}
