//! Updatables
//!
//! Every entity the engine tracks: declared packages, MCUs and fleet's own
//! checkout. An updatable knows its lock key, how to build its data source
//! and which providers to run; the lifecycle bookkeeping around it lives in
//! [`EntityProgress`].

mod mcu;
mod package;
mod self_update;

pub use mcu::Mcu;
pub use package::Package;
pub use self_update::SelfUpdate;

use async_trait::async_trait;
use fleet_meta::Phase;

use crate::Result;
use crate::lock::{LockKey, Status, Versioned};
use crate::names::NiceNames;
use crate::progress::{Breadcrumb, EntityProgress, LineKind, TriggerOrigin};
use crate::provider::{Provider, ProviderContext, ProviderRegistry};
use crate::settings::Settings;
use crate::source::DataSource;
use crate::template::Renderer;

/// Host services shared by every updatable of a batch.
#[derive(Clone, Copy)]
pub struct UpdateContext<'a> {
    pub settings: &'a Settings,
    pub registry: &'a ProviderRegistry,
    pub renderer: &'a dyn Renderer,
    pub names: &'a NiceNames,
}

#[async_trait]
pub trait Updatable: Send + Sync {
    fn key(&self) -> LockKey;

    /// Display name.
    fn name(&self, cx: &UpdateContext<'_>) -> String;

    /// Context shell and message triggers of this entity run in.
    fn origin(&self, cx: &UpdateContext<'_>) -> TriggerOrigin;

    /// Recompute versions without touching installed files.
    async fn refresh(&self, cx: &UpdateContext<'_>, record: &mut Versioned, log: &Breadcrumb) -> Result<()>;

    async fn update(&self, cx: &UpdateContext<'_>, progress: &mut EntityProgress<'_>) -> Result<()>;

    async fn remove(&self, cx: &UpdateContext<'_>, progress: &mut EntityProgress<'_>) -> Result<()>;
}

/// Which provider entry point to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Apply,
    Remove,
}

/// Run one provider inside its own scope; the scope is closed on failure
/// too so recorded provenance survives.
pub(crate) async fn run_provider(
    provider: &dyn Provider,
    ctx: &ProviderContext<'_>,
    progress: &mut EntityProgress<'_>,
    mode: Mode,
) -> Result<()> {
    let mut scope = progress.provider(provider.discriminator());
    let result = match mode {
        Mode::Apply => provider.apply(ctx, &mut scope).await,
        Mode::Remove => provider.remove(ctx, &mut scope).await,
    };
    progress.finish_provider(scope, result.is_ok());
    result
}

/// Bring the entity's files up to date through its data source.
pub(crate) async fn pull(source: &dyn DataSource, progress: &mut EntityProgress<'_>) -> Result<bool> {
    let log = progress.log().clone();
    let fresh = !source.path().exists();
    if fresh {
        progress.mark_installing();
    }

    let changed = source.update(progress.record(), &log).await?;
    if changed {
        progress.mark_changed();
    }

    let version = progress.record().current_version.clone();
    match (fresh, changed) {
        (true, _) => log.emit(LineKind::Changed, format!("Installed {version}")),
        (false, true) => log.emit(LineKind::Changed, format!("Updated to {version}")),
        (false, false) => log.emit(LineKind::Unchanged, "Up to date"),
    }
    Ok(changed)
}

/// Lifecycle events implied by the status an update reached.
pub(crate) fn phase(status: Status) -> Phase {
    Phase {
        installed: status == Status::Installing,
        updated: status == Status::Updating,
        removed: status == Status::Removing,
    }
}
