//! End-to-end batches against git upstreams on disk

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fleet_core::lock::Status;
use fleet_core::progress::ProviderProgress;
use fleet_core::{
    Engine, LockKey, LockStore, ProgressLine, ProgressSink, Provider, ProviderContext, Selection, Settings,
};
use fleet_meta::{Fleetfile, Identifier};
use fleet_test_utils::git::{UpstreamRepo, short};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const MANIFEST: &str = "name: printer-macros\nprovides:\n  user-config:\n    link: [macros.cfg]\n";

#[derive(Default)]
struct Lines(Mutex<Vec<String>>);

impl Lines {
    fn contains(&self, needle: &str) -> bool {
        self.0.lock().unwrap().iter().any(|line| line.contains(needle))
    }
}

impl ProgressSink for Lines {
    fn line(&self, line: &ProgressLine) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

struct Host {
    dir: TempDir,
    upstream: UpstreamRepo,
    lines: Arc<Lines>,
}

impl Host {
    fn new(manifest: &str) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("home")).unwrap();
        let upstream = UpstreamRepo::with_files(
            &dir.path().join("upstream"),
            &[("fleet.yml", manifest), ("macros.cfg", "[gcode_macro PARK]\n")],
        );
        let host = Self {
            dir,
            upstream,
            lines: Arc::new(Lines::default()),
        };
        host.declare(true);
        host
    }

    fn settings(&self) -> Settings {
        let root = self.dir.path();
        Settings::rooted_at(&root.join("home"), &root.join("opt"), &root.join("venvs"))
    }

    fn fleetfile(&self) -> PathBuf {
        self.dir.path().join("home/fleet.yml")
    }

    fn declare(&self, present: bool) {
        let content = if present {
            format!("requires:\n  - git: {}\n    branch: main\n", self.upstream.url())
        } else {
            "requires: []\n".to_string()
        };
        std::fs::write(self.fleetfile(), content).unwrap();
    }

    fn engine(&self) -> Engine {
        let fleetfile = Fleetfile::load(self.fleetfile()).unwrap();
        let store = LockStore::load(Settings::lock_path_for(&self.fleetfile())).unwrap();
        Engine::new(self.settings(), fleetfile, store, self.lines.clone())
    }

    fn key(&self) -> LockKey {
        LockKey::Package(Identifier::new("git", self.upstream.url()))
    }

    fn checkout(&self) -> PathBuf {
        self.dir.path().join("opt/git-upstream")
    }

    fn link(&self) -> PathBuf {
        self.dir.path().join("home/macros.cfg")
    }
}

fn is_link(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

#[tokio::test]
async fn first_update_installs_and_links() {
    let host = Host::new(MANIFEST);
    let mut engine = host.engine();

    let report = engine.update(&Selection::all(), false).await.unwrap();

    assert_eq!(report.to_string(), "[Installed 1] [Updated 0] [Removed 0] [Unchanged 0]");
    assert!(host.checkout().join(".git").is_dir());
    assert!(is_link(&host.link()));

    let record = engine.store().get(&host.key()).unwrap();
    assert_eq!(record.status, Status::Finished);
    assert_eq!(record.current_version, short(host.upstream.head()));
    assert_eq!(record.current_version, record.remote_version);
    assert!(record.provided.has("user-config"));
    assert!(!record.recipe_dirty());
    assert!(host.lines.contains("[Printer Macros]"));
}

#[tokio::test]
async fn refresh_lists_the_upstream_backlog() {
    let host = Host::new(MANIFEST);
    let mut engine = host.engine();
    engine.update(&Selection::all(), false).await.unwrap();
    let installed = host.upstream.head();

    let first = host.upstream.commit_file("macros.cfg", "[gcode_macro PARK]\n# z hop\n", "Hop before parking");
    let second = host.upstream.commit_file("macros.cfg", "[gcode_macro PARK]\n# z hop 5\n", "Raise hop");
    let third = host.upstream.commit_file("README.md", "macros\n", "Document macros");
    host.upstream.tag("v1.1", third);

    let report = engine.refresh(&Selection::all()).await.unwrap();
    assert_eq!(report.to_string(), "[Refreshed 1] [Skipped 0]");

    let record = engine.store().get(&host.key()).unwrap();
    assert_eq!(record.current_version, short(installed));
    assert_eq!(record.remote_version, format!("v1.1-0-g{}", short(third)));
    let shas: Vec<String> = record.commits_behind.iter().map(|c| c.sha.clone()).collect();
    assert_eq!(shas, vec![third.to_string(), second.to_string(), first.to_string()]);
    assert_eq!(record.commits_behind[0].tag.as_deref(), Some("v1.1"));
    assert_eq!(record.commits_behind[2].subject, "Hop before parking");
    assert!(record.refresh_time.is_some());

    let report = engine.update(&Selection::all(), false).await.unwrap();
    assert_eq!(report.updated, 1);
    let record = engine.store().get(&host.key()).unwrap();
    assert_eq!(record.current_version, format!("v1.1-0-g{}", short(third)));
    assert!(record.commits_behind.is_empty());
}

#[tokio::test]
async fn second_update_changes_nothing() {
    let host = Host::new(MANIFEST);
    let mut engine = host.engine();
    engine.update(&Selection::all(), false).await.unwrap();
    let before = engine.store().get(&host.key()).unwrap().clone();

    let report = engine.update(&Selection::all(), false).await.unwrap();

    assert_eq!(report.to_string(), "[Installed 0] [Updated 0] [Removed 0] [Unchanged 1]");
    let after = engine.store().get(&host.key()).unwrap();
    assert_eq!(after.provided, before.provided);
    assert_eq!(after.current_version, before.current_version);
    assert!(host.lines.contains("Up to date"));
}

#[tokio::test]
async fn undeclared_package_is_removed_with_its_files() {
    let host = Host::new(MANIFEST);
    host.engine().update(&Selection::all(), false).await.unwrap();
    assert!(is_link(&host.link()));

    host.declare(false);
    let mut engine = host.engine();
    assert!(engine.status()[0].pending_removal);

    let report = engine.update(&Selection::all(), true).await.unwrap();

    assert_eq!(report.to_string(), "[Installed 0] [Updated 0] [Removed 1] [Unchanged 0]");
    assert!(!is_link(&host.link()));
    assert!(!host.checkout().exists());
    assert!(engine.store().get(&host.key()).is_none());

    let reloaded = LockStore::load(engine.lock_path()).unwrap();
    assert!(reloaded.get(&host.key()).is_none());
}

/// Fails while `failing` is set.
struct Flaky {
    failing: Arc<AtomicBool>,
}

#[async_trait]
impl Provider for Flaky {
    fn discriminator(&self) -> &str {
        "flaky"
    }

    async fn apply(&self, _ctx: &ProviderContext<'_>, _progress: &mut ProviderProgress) -> fleet_core::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(fleet_core::Error::NotFound("flaky resource".into()));
        }
        Ok(())
    }

    async fn remove(&self, _ctx: &ProviderContext<'_>, _progress: &mut ProviderProgress) -> fleet_core::Result<()> {
        Ok(())
    }

    fn files(&self, _ctx: &ProviderContext<'_>) -> Vec<PathBuf> {
        Vec::new()
    }
}

#[tokio::test]
async fn interrupted_install_resumes_on_the_next_update() {
    let host = Host::new("name: printer-macros\nprovides:\n  - user-config:\n      link: [macros.cfg]\n  - flaky: {}\n");
    let failing = Arc::new(AtomicBool::new(true));
    let mut engine = host.engine();
    let flag = failing.clone();
    engine.registry_mut().register("flaky", move |_| {
        Ok(Box::new(Flaky {
            failing: flag.clone(),
        }))
    });

    let report = engine.update(&Selection::all(), false).await.unwrap();
    assert_eq!(report.failed, 1);
    let record = engine.store().get(&host.key()).unwrap();
    assert_eq!(record.status, Status::Installing);
    assert_eq!(record.last_error.as_deref(), Some("Not found: flaky resource"));

    let refreshed = engine.refresh(&Selection::all()).await.unwrap();
    assert_eq!(refreshed.skipped, 1);

    failing.store(false, Ordering::SeqCst);
    let report = engine.update(&Selection::all(), false).await.unwrap();

    assert_eq!(report.to_string(), "[Installed 1] [Updated 0] [Removed 0] [Unchanged 0]");
    let record = engine.store().get(&host.key()).unwrap();
    assert_eq!(record.status, Status::Finished);
    assert_eq!(record.last_error, None);
}

#[tokio::test]
async fn undeclaring_a_failed_install_removes_it() {
    let host = Host::new("name: printer-macros\nprovides:\n  - user-config:\n      link: [macros.cfg]\n  - flaky: {}\n");
    let failing = Arc::new(AtomicBool::new(true));
    let flaky_engine = |host: &Host| {
        let mut engine = host.engine();
        let flag = failing.clone();
        engine.registry_mut().register("flaky", move |_| {
            Ok(Box::new(Flaky {
                failing: flag.clone(),
            }))
        });
        engine
    };

    let report = flaky_engine(&host).update(&Selection::all(), false).await.unwrap();
    assert_eq!(report.failed, 1);

    host.declare(false);
    let mut engine = flaky_engine(&host);
    assert_eq!(engine.store().get(&host.key()).unwrap().status, Status::Installing);

    let report = engine.update(&Selection::all(), false).await.unwrap();

    assert_eq!(report.to_string(), "[Installed 0] [Updated 0] [Removed 1] [Unchanged 0]");
    assert!(engine.store().get(&host.key()).is_none());
    assert!(!host.checkout().exists());
    assert!(!is_link(&host.link()));
    let reloaded = LockStore::load(engine.lock_path()).unwrap();
    assert!(reloaded.get(&host.key()).is_none());
}

#[tokio::test]
async fn selection_by_name_skips_other_packages() {
    let host = Host::new(MANIFEST);
    let mut engine = host.engine();

    let report = engine.update(&Selection::named("camera tools"), false).await.unwrap();

    assert_eq!(report.to_string(), "[Installed 0] [Updated 0] [Removed 0] [Unchanged 0]");
    assert!(!host.checkout().exists());
}
