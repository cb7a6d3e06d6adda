//! Filesystem primitives for the fleet update engine
//!
//! Provides normalized paths, atomic writes, the advisory lock guarding
//! the lock file, recipe checksums and format-agnostic config loading.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;
pub mod lock;
pub mod path;

pub use config::ConfigStore;
pub use error::{Error, Result};
pub use lock::{FileLock, LockGuard};
pub use path::NormalizedPath;
