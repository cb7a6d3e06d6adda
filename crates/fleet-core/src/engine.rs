//! Batch engine
//!
//! Drives every declared entity through one lifecycle at a time: refresh
//! discovers versions, update pulls and applies providers, and anything
//! recorded in the lock but no longer declared is removed. Triggers
//! collected during a batch are deduplicated and dispatched at the end.
//!
//! A failing entity never aborts the batch; its error is recorded on its
//! lock record and the next entity runs.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_meta::data_source::DEFAULT_BRANCH;
use fleet_meta::{Changes, DataSourceSpec, Dependency, Fleetfile, Identifier};

use crate::host::UnitInfo;
use crate::lock::{LockKey, LockStore, Reconciled, UNKNOWN_VERSION};
use crate::names::NiceNames;
use crate::progress::{BatchReport, Breadcrumb, EntityProgress, LineKind, ProgressRoot, ProgressSink, TriggerOrigin};
use crate::provider::ProviderRegistry;
use crate::settings::Settings;
use crate::template::{PlaceholderRenderer, Renderer};
use crate::trigger::TriggerDispatcher;
use crate::updatable::{Mcu, Package, SelfUpdate, Updatable, UpdateContext};
use crate::{Error, Result};

/// Which entities a batch covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Display name, package id or MCU name; every entity when `None`
    pub name: Option<String>,
    pub mcus_only: bool,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            mcus_only: false,
        }
    }

    pub fn mcus() -> Self {
        Self {
            name: None,
            mcus_only: true,
        }
    }

    fn matches(&self, key: &LockKey, display: Option<&str>) -> bool {
        if self.mcus_only && !matches!(key, LockKey::Mcu(_)) {
            return false;
        }
        let Some(wanted) = &self.name else {
            return true;
        };
        let wanted = wanted.to_lowercase();
        key_name(key).to_lowercase() == wanted || display.is_some_and(|d| d.to_lowercase() == wanted)
    }
}

/// The short name of a lock key: package id, MCU name or `fleet`.
pub fn key_name(key: &LockKey) -> String {
    match key {
        LockKey::SelfUpdate => "fleet".to_string(),
        LockKey::Mcu(name) => name.clone(),
        LockKey::Package(id) => id.id().to_string(),
    }
}

/// Rebuild the origin of a recorded dependency that left the fleetfile.
fn spec_of(identifier: &Identifier) -> Option<DataSourceSpec> {
    let id = identifier.id().to_string();
    match identifier.kind() {
        "git" => Some(DataSourceSpec::Git {
            url: id,
            branch: DEFAULT_BRANCH.to_string(),
        }),
        "zip" => Some(DataSourceSpec::Zip { url: id }),
        "local" => Some(DataSourceSpec::Local { path: id }),
        "internal" => Some(DataSourceSpec::Internal { name: id }),
        _ => None,
    }
}

/// Result of a refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    /// Unfinished entities left alone
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Refreshed {}] [Skipped {}]", self.refreshed, self.skipped)?;
        if self.failed > 0 {
            write!(f, " [Failed {}]", self.failed)?;
        }
        Ok(())
    }
}

/// One row of `fleet status`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityStatus {
    pub key: LockKey,
    pub name: String,
    pub current_version: String,
    pub remote_version: String,
    pub commits_behind: usize,
    pub installed: bool,
    pub unfinished: bool,
    /// Recorded but no longer declared
    pub pending_removal: bool,
    pub last_error: Option<String>,
}

/// What a reconciliation pass found after external edits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub declared: Changes,
    pub recorded: Reconciled,
}

type Planned = (LockKey, Result<Box<dyn Updatable>>);

pub struct Engine {
    settings: Settings,
    registry: ProviderRegistry,
    renderer: Arc<dyn Renderer>,
    names: NiceNames,
    fleetfile: Fleetfile,
    store: LockStore,
    sink: Arc<dyn ProgressSink>,
    self_update: Option<SelfUpdate>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("fleetfile", &self.fleetfile.path())
            .field("lock", &self.store.path())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Engine {
    /// Load the fleetfile (found under `config_root` unless given) and its
    /// lock file, with the built-in providers.
    pub fn open(settings: Settings, fleetfile: Option<&Path>, sink: Arc<dyn ProgressSink>) -> Result<Self> {
        let path = match fleetfile {
            Some(path) => path.to_path_buf(),
            None => Fleetfile::find_in(&settings.config_root)?,
        };
        let fleetfile = Fleetfile::load(&path)?;
        let store = LockStore::load(Settings::lock_path_for(&path))?;
        let names = NiceNames::load(&settings.self_dir.join("nice_names.txt"));
        let self_update = SelfUpdate::detect(&settings.self_dir);
        Ok(Self::new(settings, fleetfile, store, sink)
            .with_names(names)
            .with_self_update(self_update))
    }

    pub fn new(settings: Settings, fleetfile: Fleetfile, store: LockStore, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            registry: ProviderRegistry::builtin(&settings),
            renderer: Arc::new(PlaceholderRenderer),
            names: NiceNames::default(),
            settings,
            fleetfile,
            store,
            sink,
            self_update: None,
        }
    }

    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_names(mut self, names: NiceNames) -> Self {
        self.names = names;
        self
    }

    pub fn with_self_update(mut self, self_update: Option<SelfUpdate>) -> Self {
        self.self_update = self_update;
        self
    }

    pub fn set_sink(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sink = sink;
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Register external providers, e.g. firmware flashing.
    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    pub fn fleetfile(&self) -> &Fleetfile {
        &self.fleetfile
    }

    pub fn store(&self) -> &LockStore {
        &self.store
    }

    fn context(&self) -> UpdateContext<'_> {
        UpdateContext {
            settings: &self.settings,
            registry: &self.registry,
            renderer: self.renderer.as_ref(),
            names: &self.names,
        }
    }

    /// Declared entities in batch order: fleet itself, packages, MCUs.
    fn declared(&self, selection: &Selection, include_mcus: bool) -> Vec<Planned> {
        let mut planned: Vec<Planned> = Vec::new();
        if let Some(self_update) = &self.self_update {
            planned.push((LockKey::SelfUpdate, Ok(Box::new(self_update.clone()))));
        }
        for dependency in self.fleetfile.requires().iter().filter(|d| d.enabled) {
            let package = Package::new(dependency.clone(), &self.settings);
            planned.push((
                LockKey::Package(dependency.identifier()),
                package.map(|p| Box::new(p) as Box<dyn Updatable>),
            ));
        }
        if include_mcus {
            for spec in self.fleetfile.mcus() {
                let mcu = Mcu::new(spec.clone(), &self.settings.firmware_checkout, &self.settings.firmware_dir);
                planned.push((LockKey::Mcu(spec.name.clone()), Ok(Box::new(mcu))));
            }
        }

        let cx = self.context();
        planned.retain(|(key, entity)| {
            let display = entity.as_ref().ok().map(|e| e.name(&cx));
            selection.matches(key, display.as_deref())
        });
        planned
    }

    /// Recorded dependencies no longer declared (or disabled), as packages
    /// to remove.
    fn undeclared(&self, selection: &Selection) -> Vec<Planned> {
        let declared: BTreeSet<Identifier> = self
            .fleetfile
            .requires()
            .iter()
            .filter(|d| d.enabled)
            .map(Dependency::identifier)
            .collect();

        let cx = self.context();
        self.store
            .difference(&declared)
            .into_iter()
            .map(|id| {
                let dependency = self
                    .fleetfile
                    .dependency(&id)
                    .cloned()
                    .or_else(|| spec_of(&id).map(Dependency::new));
                let package = match dependency {
                    Some(dependency) => Package::new(dependency, &self.settings).map(|p| Box::new(p) as Box<dyn Updatable>),
                    None => Err(Error::NotFound(format!("data source type '{}'", id.kind()))),
                };
                (LockKey::Package(id), package)
            })
            .filter(|(key, entity)| {
                let display = entity.as_ref().ok().map(|e| e.name(&cx));
                selection.matches(key, display.as_deref())
            })
            .collect()
    }

    /// Recompute versions of the selected entities. Unfinished entities are
    /// skipped: their recorded versions cannot be trusted until an update
    /// completes.
    pub async fn refresh(&mut self, selection: &Selection) -> Result<RefreshReport> {
        let _guard = self.store.acquire()?;
        let planned = self.declared(selection, true);
        let cx = UpdateContext {
            settings: &self.settings,
            registry: &self.registry,
            renderer: self.renderer.as_ref(),
            names: &self.names,
        };
        let root = Breadcrumb::new(self.sink.clone());
        let mut report = RefreshReport::default();

        for (key, entity) in planned {
            let entity = match entity {
                Ok(entity) => entity,
                Err(e) => {
                    root.child(key_name(&key)).emit(LineKind::Error, e.to_string());
                    self.store.always(&key).last_error = Some(e.to_string());
                    report.failed += 1;
                    continue;
                }
            };
            let name = entity.name(&cx);
            let log = root.child(name.clone());
            let record = self.store.always(&key);
            if record.status.unfinished() {
                log.warn(Error::Unfinished { name }.to_string());
                report.skipped += 1;
                continue;
            }

            match entity.refresh(&cx, record, &log).await {
                Ok(()) => report.refreshed += 1,
                Err(e) => {
                    log.emit(LineKind::Error, e.to_string());
                    record.last_error = Some(e.to_string());
                    report.failed += 1;
                }
            }
        }

        self.store.save()?;
        tracing::info!(%report, "refresh finished");
        Ok(report)
    }

    /// Update the selected declared entities, then remove recorded ones
    /// that are no longer declared, then dispatch the collected triggers.
    pub async fn update(&mut self, selection: &Selection, remove_only: bool) -> Result<BatchReport> {
        let _guard = self.store.acquire()?;
        let updates = if remove_only {
            Vec::new()
        } else {
            self.declared(selection, !self.settings.mcu_providers.is_empty())
        };
        let removals = self.undeclared(selection);
        let stale_mcus: Vec<String> = if selection.name.is_none() {
            self.store
                .mcus()
                .map(|(name, _)| name.clone())
                .filter(|name| !self.fleetfile.mcus().iter().any(|m| &m.name == name))
                .collect()
        } else {
            Vec::new()
        };

        let cx = UpdateContext {
            settings: &self.settings,
            registry: &self.registry,
            renderer: self.renderer.as_ref(),
            names: &self.names,
        };
        let mut root = ProgressRoot::new(self.sink.clone());

        for (key, entity) in updates {
            lifecycle(&cx, &mut root, &mut self.store, key, entity, false).await?;
        }
        for (key, entity) in removals {
            lifecycle(&cx, &mut root, &mut self.store, key, entity, true).await?;
        }
        for name in stale_mcus {
            root.breadcrumb().child(name.clone()).emit(LineKind::Removed, "No longer declared");
            self.store.remove(&LockKey::Mcu(name));
        }

        let pending = root.take_triggers();
        if !pending.is_empty() {
            let dispatcher = TriggerDispatcher::new(&self.settings, self.renderer.as_ref(), root.breadcrumb());
            dispatcher.dispatch_all(pending).await;
        }

        self.store.save()?;
        let report = root.report();
        tracing::info!(%report, "update finished");
        Ok(report)
    }

    /// Current state of every declared entity plus recorded ones awaiting
    /// removal.
    pub fn status(&self) -> Vec<EntityStatus> {
        let cx = self.context();
        let row = |key: LockKey, name: String, pending_removal: bool| {
            let record = self.store.get(&key).cloned().unwrap_or_default();
            EntityStatus {
                name,
                current_version: record.current_version.clone(),
                remote_version: record.remote_version.clone(),
                commits_behind: record.commits_behind.len(),
                installed: record.is_installed(),
                unfinished: record.status.unfinished(),
                pending_removal,
                last_error: record.last_error,
                key,
            }
        };

        let mut rows: Vec<EntityStatus> = self
            .declared(&Selection::all(), true)
            .into_iter()
            .map(|(key, entity)| {
                let name = match &entity {
                    Ok(entity) => entity.name(&cx),
                    Err(_) => key_name(&key),
                };
                row(key, name, false)
            })
            .collect();
        rows.extend(self.undeclared(&Selection::all()).into_iter().map(|(key, entity)| {
            let name = match &entity {
                Ok(entity) => entity.name(&cx),
                Err(_) => key_name(&key),
            };
            row(key, name, true)
        }));
        rows
    }

    /// Declared entities as units for a host.
    pub fn units(&self) -> Vec<UnitInfo> {
        let cx = self.context();
        self.declared(&Selection::all(), true)
            .into_iter()
            .map(|(key, entity)| {
                let name = match &entity {
                    Ok(entity) => entity.name(&cx),
                    Err(_) => key_name(&key),
                };
                UnitInfo::new(key, name)
            })
            .collect()
    }

    /// Re-read the fleetfile and the lock file after external edits.
    pub fn reconcile(&mut self) -> Result<Reconciliation> {
        let declared = self.fleetfile.update()?;
        let recorded = self.store.update()?;
        Ok(Reconciliation { declared, recorded })
    }

    /// Path of the lock file, for watchers.
    pub fn lock_path(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }
}

/// One entity's update or removal inside its lifecycle scope.
async fn lifecycle(
    cx: &UpdateContext<'_>,
    root: &mut ProgressRoot,
    store: &mut LockStore,
    key: LockKey,
    entity: Result<Box<dyn Updatable>>,
    remove: bool,
) -> Result<()> {
    match entity {
        Ok(entity) => {
            let origin = entity.origin(cx);
            let mut progress = EntityProgress::enter(root, store, key, origin);
            let result = if remove {
                entity.remove(cx, &mut progress).await
            } else {
                entity.update(cx, &mut progress).await
            };
            progress.exit(result.as_ref().err())
        }
        Err(error) => {
            let origin = TriggerOrigin::new(key_name(&key), PathBuf::new());
            EntityProgress::enter(root, store, key, origin).exit(Some(&error))
        }
    }
}

/// `?` versions in status listings read as "unknown".
pub fn display_version(version: &str) -> &str {
    if version == UNKNOWN_VERSION { "unknown" } else { version }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Selection::all(), LockKey::SelfUpdate, None, true)]
    #[case(Selection::mcus(), LockKey::SelfUpdate, None, false)]
    #[case(Selection::mcus(), LockKey::Mcu("toolhead".into()), None, true)]
    #[case(Selection::named("Toolhead"), LockKey::Mcu("toolhead".into()), None, true)]
    #[case(Selection::named("fleet"), LockKey::SelfUpdate, Some("Fleet"), true)]
    #[case(
        Selection::named("klipper macros"),
        LockKey::Package(Identifier::new("git", "https://github.com/acme/klipper-macros.git")),
        Some("Klipper Macros"),
        true
    )]
    #[case(
        Selection::named("mainsail"),
        LockKey::Package(Identifier::new("git", "https://github.com/acme/klipper-macros.git")),
        Some("Klipper Macros"),
        false
    )]
    fn selections(#[case] selection: Selection, #[case] key: LockKey, #[case] display: Option<&str>, #[case] expected: bool) {
        assert_eq!(selection.matches(&key, display), expected);
    }

    #[rstest]
    #[case(Identifier::new("git", "https://x/y.git"), Some(DataSourceSpec::git("https://x/y.git")))]
    #[case(Identifier::new("internal", "mainsail"), Some(DataSourceSpec::Internal { name: "mainsail".into() }))]
    #[case(Identifier::new("svn", "https://x/y"), None)]
    fn recorded_origins(#[case] identifier: Identifier, #[case] expected: Option<DataSourceSpec>) {
        assert_eq!(spec_of(&identifier), expected);
    }

    #[test]
    fn refresh_report_mentions_failures_only_when_present() {
        let mut report = RefreshReport {
            refreshed: 3,
            skipped: 1,
            failed: 0,
        };
        assert_eq!(report.to_string(), "[Refreshed 3] [Skipped 1]");
        report.failed = 2;
        assert_eq!(report.to_string(), "[Refreshed 3] [Skipped 1] [Failed 2]");
    }
}
