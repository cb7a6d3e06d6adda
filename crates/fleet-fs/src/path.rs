//! Normalized path handling

use std::path::{Path, PathBuf};

/// A path normalized to use forward slashes internally.
///
/// Lock-file provenance records store paths as strings, so every path that
/// ends up on disk goes through this type first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath {
    inner: String,
}

impl NormalizedPath {
    /// Create a new NormalizedPath from any path-like input.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path_str = path.as_ref().to_string_lossy();
        let mut normalized = path_str.replace('\\', "/");
        while normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }
        Self { inner: normalized }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Convert to a platform-native PathBuf for I/O operations.
    pub fn to_native(&self) -> PathBuf {
        PathBuf::from(&self.inner)
    }

    /// Join this path with a segment. Absolute segments replace the base.
    pub fn join(&self, segment: &str) -> Self {
        let segment_normalized = segment.replace('\\', "/");
        if segment_normalized.starts_with('/') || self.inner.is_empty() {
            return Self::new(segment_normalized);
        }
        let joined = if self.inner.ends_with('/') {
            format!("{}{}", self.inner, segment_normalized)
        } else {
            format!("{}/{}", self.inner, segment_normalized)
        };
        Self::new(joined)
    }

    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.inner.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) if idx > 0 => Some(Self {
                inner: trimmed[..idx].to_string(),
            }),
            Some(0) if trimmed.len() > 1 => Some(Self {
                inner: "/".to_string(),
            }),
            _ => None,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        let trimmed = self.inner.trim_end_matches('/');
        trimmed.rsplit('/').next().filter(|name| !name.is_empty())
    }

    pub fn is_absolute(&self) -> bool {
        self.inner.starts_with('/')
    }

    pub fn exists(&self) -> bool {
        self.to_native().exists()
    }

    /// True for dangling symlinks as well as anything `exists` sees.
    pub fn is_present(&self) -> bool {
        std::fs::symlink_metadata(self.to_native()).is_ok()
    }

    pub fn is_dir(&self) -> bool {
        self.to_native().is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.to_native().is_file()
    }

    /// Strip a leading directory, for short display names.
    pub fn strip_prefix(&self, prefix: &NormalizedPath) -> Option<&str> {
        let rest = self.inner.strip_prefix(prefix.as_str())?;
        if rest.is_empty() {
            return Some(rest);
        }
        rest.strip_prefix('/')
    }

    pub fn extension(&self) -> Option<&str> {
        self.file_name().and_then(|name| {
            let idx = name.rfind('.')?;
            if idx == 0 { None } else { Some(&name[idx + 1..]) }
        })
    }
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        Path::new(&self.inner)
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<&str> for NormalizedPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NormalizedPath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<PathBuf> for NormalizedPath {
    fn from(p: PathBuf) -> Self {
        Self::new(p)
    }
}

impl From<&Path> for NormalizedPath {
    fn from(p: &Path) -> Self {
        Self::new(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/opt/pkg/", "/opt/pkg")]
    #[case("C:\\opt\\pkg", "C:/opt/pkg")]
    #[case("/", "/")]
    fn normalizes_separators_and_trailing_slash(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(NormalizedPath::new(input).as_str(), expected);
    }

    #[test]
    fn join_with_absolute_segment_replaces_base() {
        let base = NormalizedPath::new("/home/pi");
        assert_eq!(base.join("config").as_str(), "/home/pi/config");
        assert_eq!(base.join("/etc/motd").as_str(), "/etc/motd");
    }

    #[test]
    fn parent_and_file_name() {
        let path = NormalizedPath::new("/opt/pkg/fleet.yml");
        assert_eq!(path.parent().unwrap().as_str(), "/opt/pkg");
        assert_eq!(path.file_name(), Some("fleet.yml"));
        assert_eq!(path.extension(), Some("yml"));
        assert_eq!(NormalizedPath::new("/").parent(), None);
    }

    #[test]
    fn strip_prefix_drops_separator() {
        let root = NormalizedPath::new("/home/pi");
        let path = NormalizedPath::new("/home/pi/printer_data/config");
        assert_eq!(path.strip_prefix(&root), Some("printer_data/config"));
        assert_eq!(NormalizedPath::new("/etc").strip_prefix(&root), None);
    }
}
