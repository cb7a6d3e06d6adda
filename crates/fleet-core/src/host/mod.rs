//! Host integration
//!
//! A long-running host (the printer's API server) surfaces fleet's
//! entities as units of work. The host implements [`HostAdapter`];
//! [`HostService`] owns the engine, forwards progress to the adapter and
//! keeps the adapter's unit list in step with the fleetfile and lock file.

mod watcher;

pub use watcher::{LockWatcher, SaveGate};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::Result;
use crate::engine::{Engine, Reconciliation, RefreshReport, Selection};
use crate::lock::LockKey;
use crate::progress::{BatchReport, ProgressLine, ProgressSink};

/// An entity as the host lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub key: LockKey,
    pub name: String,
}

impl UnitInfo {
    pub fn new(key: LockKey, name: impl Into<String>) -> Self {
        Self { key, name: name.into() }
    }
}

/// What the host provides to fleet.
pub trait HostAdapter: Send + Sync {
    /// A unit appeared.
    fn register(&self, unit: UnitInfo);

    fn unregister(&self, name: &str);

    /// One progress line of a running batch.
    fn progress(&self, line: &ProgressLine);

    /// Versions changed; the host should re-read statuses.
    fn refreshed(&self);
}

/// Progress sink that forwards to a host adapter.
struct AdapterSink(Arc<dyn HostAdapter>);

impl ProgressSink for AdapterSink {
    fn line(&self, line: &ProgressLine) {
        self.0.progress(line);
    }
}

/// Engine shared between host requests and the lock watcher.
pub struct HostService {
    engine: Mutex<Engine>,
    adapter: Arc<dyn HostAdapter>,
    gate: Arc<SaveGate>,
    units: Mutex<BTreeMap<LockKey, String>>,
}

impl HostService {
    pub fn new(mut engine: Engine, adapter: Arc<dyn HostAdapter>) -> Self {
        engine.set_sink(Arc::new(AdapterSink(adapter.clone())));
        Self {
            engine: Mutex::new(engine),
            adapter,
            gate: Arc::new(SaveGate::default()),
            units: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register every declared entity with the host.
    pub async fn start(&self) {
        let engine = self.engine.lock().await;
        self.sync_units(&engine).await;
    }

    pub fn gate(&self) -> Arc<SaveGate> {
        self.gate.clone()
    }

    /// Reconcile whenever the fleetfile or lock file is edited externally.
    pub async fn watch(self: &Arc<Self>) -> Result<LockWatcher> {
        let (files, debounce) = self
            .with_engine(|engine| {
                let files = vec![engine.fleetfile().path().to_path_buf(), engine.lock_path()];
                (files, Duration::from_millis(engine.settings().debounce_ms))
            })
            .await;
        LockWatcher::spawn(Arc::clone(self), files, debounce)
    }

    pub async fn refresh(&self, selection: &Selection) -> Result<RefreshReport> {
        let mut engine = self.engine.lock().await;
        let report = {
            let _saving = self.gate.pause();
            engine.refresh(selection).await
        }?;
        self.adapter.refreshed();
        Ok(report)
    }

    pub async fn update(&self, selection: &Selection, remove_only: bool) -> Result<BatchReport> {
        let mut engine = self.engine.lock().await;
        let report = {
            let _saving = self.gate.pause();
            engine.update(selection, remove_only).await
        }?;
        self.sync_units(&engine).await;
        self.adapter.refreshed();
        Ok(report)
    }

    /// Re-read the fleetfile and lock file and bring the host's units in
    /// line with them.
    pub async fn reconcile(&self) -> Result<Reconciliation> {
        let mut engine = self.engine.lock().await;
        let reconciliation = engine.reconcile()?;
        self.sync_units(&engine).await;
        self.adapter.refreshed();
        tracing::info!(
            added = reconciliation.declared.added.packages.len() + reconciliation.declared.added.mcus.len(),
            removed = reconciliation.declared.removed.packages.len() + reconciliation.declared.removed.mcus.len(),
            "reconciled with files on disk"
        );
        Ok(reconciliation)
    }

    /// Run `f` with the engine locked, e.g. to render a status table.
    pub async fn with_engine<T>(&self, f: impl FnOnce(&Engine) -> T) -> T {
        let engine = self.engine.lock().await;
        f(&engine)
    }

    async fn sync_units(&self, engine: &Engine) {
        let current: BTreeMap<LockKey, String> = engine.units().into_iter().map(|u| (u.key, u.name)).collect();
        let mut known = self.units.lock().await;

        for (key, name) in known.iter() {
            if current.get(key) != Some(name) {
                self.adapter.unregister(name);
            }
        }
        for (key, name) in &current {
            if known.get(key) != Some(name) {
                self.adapter.register(UnitInfo::new(key.clone(), name.clone()));
            }
        }
        *known = current;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Adapter that records every call.
    #[derive(Default)]
    pub struct RecordingAdapter {
        pub registered: Mutex<Vec<String>>,
        pub unregistered: Mutex<Vec<String>>,
        pub lines: Mutex<Vec<String>>,
        pub refreshes: Mutex<usize>,
    }

    impl HostAdapter for RecordingAdapter {
        fn register(&self, unit: UnitInfo) {
            self.registered.lock().unwrap().push(unit.name);
        }

        fn unregister(&self, name: &str) {
            self.unregistered.lock().unwrap().push(name.to_string());
        }

        fn progress(&self, line: &ProgressLine) {
            self.lines.lock().unwrap().push(line.to_string());
        }

        fn refreshed(&self) {
            *self.refreshes.lock().unwrap() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::testing::RecordingAdapter;
    use super::*;
    use crate::lock::LockStore;
    use crate::progress::TracingSink;
    use crate::settings::Settings;
    use fleet_meta::Fleetfile;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn service(dir: &Path, adapter: Arc<RecordingAdapter>) -> HostService {
        let settings = Settings::rooted_at(&dir.join("home"), &dir.join("opt"), &dir.join("venvs"));
        let fleetfile = Fleetfile::load(dir.join("fleet.yml")).unwrap();
        let store = LockStore::load(dir.join(".fleet.lock")).unwrap();
        let engine = Engine::new(settings, fleetfile, store, Arc::new(TracingSink));
        HostService::new(engine, adapter)
    }

    #[tokio::test]
    async fn units_follow_the_fleetfile() {
        let dir = TempDir::new().unwrap();
        let fleetfile = dir.path().join("fleet.yml");
        std::fs::write(&fleetfile, "requires:\n  - local: /srv/printer-macros\n").unwrap();
        let adapter = Arc::new(RecordingAdapter::default());
        let service = service(dir.path(), adapter.clone());

        service.start().await;
        assert_eq!(*adapter.registered.lock().unwrap(), vec!["Printer Macros".to_string()]);

        std::fs::write(&fleetfile, "requires:\n  - local: /srv/camera-tools\n").unwrap();
        let reconciliation = service.reconcile().await.unwrap();
        assert_eq!(reconciliation.declared.added.packages.len(), 1);
        assert_eq!(reconciliation.declared.removed.packages.len(), 1);
        assert_eq!(
            *adapter.registered.lock().unwrap(),
            vec!["Printer Macros".to_string(), "Camera Tools".to_string()]
        );
        assert_eq!(*adapter.unregistered.lock().unwrap(), vec!["Printer Macros".to_string()]);
        assert_eq!(*adapter.refreshes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn progress_reaches_the_host() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("printer-macros");
        std::fs::create_dir_all(&package).unwrap();
        std::fs::write(package.join("fleet.yml"), "name: printer-macros\n").unwrap();
        std::fs::write(
            dir.path().join("fleet.yml"),
            format!("requires:\n  - local: {}\n", package.display()),
        )
        .unwrap();
        let adapter = Arc::new(RecordingAdapter::default());
        let service = service(dir.path(), adapter.clone());

        let report = service.update(&Selection::all(), false).await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert!(
            adapter
                .lines
                .lock()
                .unwrap()
                .contains(&"[Printer Macros] Up to date".to_string())
        );
        assert!(!service.gate().suppressed(std::time::Duration::ZERO));
    }
}
