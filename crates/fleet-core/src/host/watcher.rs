//! Watches the fleetfile and lock file for edits made by other processes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::HostService;
use crate::Result;

/// Tells the watcher when file events are fleet's own saves.
#[derive(Debug, Default)]
pub struct SaveGate {
    paused: AtomicBool,
    resumed: Mutex<Option<Instant>>,
}

/// Resumes the gate when dropped.
#[must_use]
pub struct Paused<'a>(&'a SaveGate);

impl Drop for Paused<'_> {
    fn drop(&mut self) {
        self.0.paused.store(false, Ordering::SeqCst);
        if let Ok(mut resumed) = self.0.resumed.lock() {
            *resumed = Some(Instant::now());
        }
    }
}

impl SaveGate {
    pub fn pause(&self) -> Paused<'_> {
        self.paused.store(true, Ordering::SeqCst);
        Paused(self)
    }

    /// Whether events should be ignored: saving is in progress or ended
    /// less than `window` ago.
    pub fn suppressed(&self, window: Duration) -> bool {
        if self.paused.load(Ordering::SeqCst) {
            return true;
        }
        match self.resumed.lock() {
            Ok(resumed) => resumed.is_some_and(|at| at.elapsed() < window),
            Err(_) => false,
        }
    }
}

/// Debounced watcher running a full reconciliation after external edits.
///
/// Parent directories are watched rather than the files themselves so
/// atomic replacements (write to temp, rename) are seen.
pub struct LockWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl LockWatcher {
    pub fn spawn(service: Arc<HostService>, files: Vec<PathBuf>, debounce: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = files.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event.paths.iter().any(|p| watched.iter().any(|w| p == w)) {
                    let _ = tx.send(());
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        })?;

        let mut directories: Vec<&Path> = files.iter().filter_map(|f| f.parent()).collect();
        directories.dedup();
        for directory in directories {
            watcher.watch(directory, RecursiveMode::NonRecursive)?;
        }
        tracing::info!(files = ?files, debounce_ms = debounce.as_millis() as u64, "lock watcher started");

        let task = tokio::spawn(run(service, rx, debounce));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for LockWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(service: Arc<HostService>, mut rx: mpsc::UnboundedReceiver<()>, debounce: Duration) {
    let gate = service.gate();
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        if gate.suppressed(debounce) {
            tracing::debug!("ignoring own writes");
            continue;
        }
        if let Err(e) = service.reconcile().await {
            tracing::warn!(error = %e, "reconciliation failed");
        }
    }
}
