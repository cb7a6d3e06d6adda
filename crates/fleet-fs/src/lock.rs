//! Re-entrant, non-blocking advisory lock for the lock file
//!
//! The lock lives on a sidecar file next to the guarded path because the
//! guarded file itself is replaced by rename on every save, which would
//! drop an advisory lock held on the old inode.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;

use crate::{Error, Result};

#[derive(Debug, Default)]
struct LockState {
    depth: usize,
    file: Option<File>,
}

/// Exclusive advisory lock guarding one path across processes.
///
/// Acquisition never blocks: when another process holds the lock it fails
/// with [`Error::OperationInProgress`]. Within one process the lock nests;
/// the OS lock is released when the outermost [`LockGuard`] drops.
#[derive(Debug)]
pub struct FileLock {
    guarded: PathBuf,
    sidecar: PathBuf,
    state: Mutex<LockState>,
}

impl FileLock {
    pub fn new(guarded: impl Into<PathBuf>) -> Arc<Self> {
        let guarded = guarded.into();
        let sidecar = sidecar_for(&guarded);
        Arc::new(Self {
            guarded,
            sidecar,
            state: Mutex::new(LockState::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.guarded
    }

    /// Acquire (or re-enter) the lock.
    pub fn acquire(self: &Arc<Self>) -> Result<LockGuard> {
        let mut state = self.state();

        if state.file.is_none() {
            if let Some(parent) = self.sidecar.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.sidecar)
                .map_err(|e| Error::io(&self.sidecar, e))?;

            if let Err(e) = file.try_lock_exclusive() {
                if e.kind() == fs2::lock_contended_error().kind() {
                    tracing::debug!(path = %self.guarded.display(), "lock held by another process");
                    return Err(Error::OperationInProgress {
                        path: self.guarded.clone(),
                    });
                }
                return Err(Error::io(&self.sidecar, e));
            }
            state.file = Some(file);
        }

        state.depth += 1;
        Ok(LockGuard {
            lock: Arc::clone(self),
        })
    }

    /// Current nesting depth; zero when not held by this process.
    pub fn depth(&self) -> usize {
        self.state().depth
    }

    pub fn is_held(&self) -> bool {
        self.depth() > 0
    }

    fn release(&self) {
        let mut state = self.state();
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return;
        }
        if let Some(file) = state.file.take() {
            if let Err(e) = file.unlock() {
                tracing::warn!(path = %self.guarded.display(), error = %e, "failed to release lock");
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        // A poisoned state still holds a consistent depth/file pair.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Held lock level; dropping it leaves one nesting level.
#[derive(Debug)]
pub struct LockGuard {
    lock: Arc<FileLock>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

fn sidecar_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "fleet".to_string());
    path.with_file_name(format!("{name}.lck"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_acquisition_keeps_os_lock_until_outermost_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::new(dir.path().join(".fleet.lock"));

        let outer = lock.acquire().unwrap();
        let inner = lock.acquire().unwrap();
        assert_eq!(lock.depth(), 2);

        drop(inner);
        assert!(lock.is_held());
        drop(outer);
        assert!(!lock.is_held());
    }

    #[test]
    fn sidecar_sits_next_to_guarded_file() {
        assert_eq!(
            sidecar_for(Path::new("/home/pi/.fleet.lock")),
            PathBuf::from("/home/pi/.fleet.lock.lck")
        );
    }
}
