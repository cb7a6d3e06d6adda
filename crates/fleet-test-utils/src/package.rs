//! Package directory fixtures.

use std::fs;
use std::path::{Path, PathBuf};

/// Write a package directory containing `fleet.yml` and extra files.
///
/// # Panics
/// Panics if the filesystem operations fail.
pub fn write_package(dir: &Path, manifest: &str, files: &[(&str, &str)]) -> PathBuf {
    fs::create_dir_all(dir)
        .unwrap_or_else(|e| panic!("write_package: failed to create {}: {e}", dir.display()));
    fs::write(dir.join("fleet.yml"), manifest)
        .unwrap_or_else(|e| panic!("write_package: failed to write manifest: {e}"));
    for (name, content) in files {
        let file = dir.join(name);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .unwrap_or_else(|e| panic!("write_package: failed to create {}: {e}", parent.display()));
        }
        fs::write(&file, content)
            .unwrap_or_else(|e| panic!("write_package: failed to write {}: {e}", file.display()));
    }
    dir.to_path_buf()
}
