//! Atomic writes and the small set of tree operations providers rely on

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::{Error, NormalizedPath, Result};

/// Write content atomically to a file.
///
/// Writes to a sibling temp file, syncs it, then renames over the target so
/// readers never observe a partial lock file.
pub fn write_atomic(path: &NormalizedPath, content: &[u8]) -> Result<()> {
    let native_path = path.to_native();

    if let Some(parent) = native_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let temp_name = format!(
        ".{}.{}.tmp",
        native_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id()
    );
    let temp_path = native_path.with_file_name(&temp_name);

    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::io(&temp_path, e))?;

    temp_file
        .write_all(content)
        .map_err(|e| Error::io(&temp_path, e))?;
    temp_file.sync_all().map_err(|e| Error::io(&temp_path, e))?;

    fs::rename(&temp_path, &native_path).map_err(|e| Error::io(&native_path, e))?;

    Ok(())
}

pub fn read_text(path: &NormalizedPath) -> Result<String> {
    let native_path = path.to_native();
    fs::read_to_string(&native_path).map_err(|e| Error::io(&native_path, e))
}

pub fn write_text(path: &NormalizedPath, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes())
}

/// Remove whatever is at `path`: file, symlink or directory tree.
///
/// Returns `false` when nothing was there.
pub fn remove_any(path: &NormalizedPath) -> Result<bool> {
    let native = path.to_native();
    let meta = match fs::symlink_metadata(&native) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::io(&native, e)),
    };

    if meta.is_dir() {
        fs::remove_dir_all(&native).map_err(|e| Error::io(&native, e))?;
    } else {
        fs::remove_file(&native).map_err(|e| Error::io(&native, e))?;
    }
    Ok(true)
}

/// True when `link` is a symlink pointing at `target`.
pub fn links_to(link: &NormalizedPath, target: &NormalizedPath) -> bool {
    match fs::read_link(link.to_native()) {
        Ok(current) => NormalizedPath::new(current) == *target,
        Err(_) => false,
    }
}

/// Replace whatever is at `link` with a symlink to `target`.
pub fn replace_with_symlink(target: &NormalizedPath, link: &NormalizedPath) -> Result<()> {
    let native = link.to_native();
    if let Some(parent) = native.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    remove_any(link)?;
    symlink(&target.to_native(), &native).map_err(|e| Error::io(&native, e))
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Recursively copy `source` (file or directory) to `destination`.
pub fn copy_tree(source: &NormalizedPath, destination: &NormalizedPath) -> Result<()> {
    copy_recursive(&source.to_native(), &destination.to_native())
}

fn copy_recursive(source: &Path, destination: &Path) -> Result<()> {
    let meta = fs::metadata(source).map_err(|e| Error::io(source, e))?;
    if meta.is_file() {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::copy(source, destination).map_err(|e| Error::io(destination, e))?;
        return Ok(());
    }

    fs::create_dir_all(destination).map_err(|e| Error::io(destination, e))?;
    for entry in fs::read_dir(source).map_err(|e| Error::io(source, e))? {
        let entry = entry.map_err(|e| Error::io(source, e))?;
        copy_recursive(&entry.path(), &destination.join(entry.file_name()))?;
    }
    Ok(())
}
