//! fleet's own checkout.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_git::Checkout;
use fleet_meta::Trigger;
use fleet_meta::data_source::DEFAULT_BRANCH;

use super::{Mode, UpdateContext, Updatable, pull, run_provider};
use crate::Result;
use crate::lock::{LockKey, Status, Versioned};
use crate::progress::{Breadcrumb, EntityProgress, TriggerOrigin};
use crate::provider::{PipAppConfig, PipAppProvider, ProviderContext};
use crate::source::{DataSource, GitSource};
use crate::template;

const NAME: &str = "Fleet";

/// Pulls fleet's checkout, reinstalls it into its virtualenv and restarts
/// the host service when anything changed.
#[derive(Debug, Clone)]
pub struct SelfUpdate {
    source: GitSource,
}

impl SelfUpdate {
    pub fn new(path: impl Into<PathBuf>, url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            source: GitSource::new(path, url, branch),
        }
    }

    /// The self-update of the checkout at `path`, `None` when it is not a
    /// git checkout with an `origin`.
    pub fn detect(path: &Path) -> Option<Self> {
        let checkout = Checkout::open(path).ok()?;
        let url = checkout.origin_url()?;
        let branch = checkout
            .current_branch()
            .ok()
            .flatten()
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        Some(Self::new(path, url, branch))
    }

    fn installer() -> PipAppProvider {
        PipAppProvider::new(PipAppConfig {
            setup: true,
            ..PipAppConfig::default()
        })
    }
}

#[async_trait]
impl Updatable for SelfUpdate {
    fn key(&self) -> LockKey {
        LockKey::SelfUpdate
    }

    fn name(&self, _cx: &UpdateContext<'_>) -> String {
        NAME.to_string()
    }

    fn origin(&self, cx: &UpdateContext<'_>) -> TriggerOrigin {
        let mut origin = TriggerOrigin::new(NAME, self.source.path());
        origin.context = template::context(cx.settings, self.source.path(), &cx.settings.self_venv(), &Default::default());
        origin
    }

    async fn refresh(&self, _cx: &UpdateContext<'_>, record: &mut Versioned, log: &Breadcrumb) -> Result<()> {
        self.source.refresh(record, log).await
    }

    async fn update(&self, cx: &UpdateContext<'_>, progress: &mut EntityProgress<'_>) -> Result<()> {
        pull(&self.source, progress).await?;
        if progress.status() == Status::Started {
            return Ok(());
        }

        let venv = cx.settings.self_venv();
        let options = Default::default();
        let template = template::context(cx.settings, self.source.path(), &venv, &options);
        let ctx = ProviderContext {
            settings: cx.settings,
            renderer: cx.renderer,
            package_dir: self.source.path(),
            package_path: None,
            venv_dir: &venv,
            options: &options,
            template: &template,
        };
        run_provider(&Self::installer(), &ctx, progress, Mode::Apply).await?;

        progress.notify(Trigger::ServiceReload {
            service: cx.settings.host_service.clone(),
            restart: true,
            daemon_reload: false,
        });
        Ok(())
    }

    async fn remove(&self, _cx: &UpdateContext<'_>, progress: &mut EntityProgress<'_>) -> Result<()> {
        progress.log().warn("fleet does not remove itself");
        Ok(())
    }
}
