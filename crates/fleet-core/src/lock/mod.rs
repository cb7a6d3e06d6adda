//! Persistent lock store
//!
//! The lock file (`.fleet.lock`, YAML) records every tracked entity under
//! three top-level keys: `qbe` for the tool's own checkout, `mcus` keyed by
//! name, and `requires` keyed by `type#id`. Unknown keys are ignored on read
//! so newer files load in older builds.

mod provided;
mod versioned;

pub use provided::{Entry, Metadata, Provided, ProviderProvided};
pub use versioned::{Status, TaggedCommit, UNKNOWN_VERSION, Versioned};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_fs::{ConfigStore, FileLock, LockGuard, NormalizedPath, io};
use fleet_meta::Identifier;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Where an entity lives in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    SelfUpdate,
    Mcu(String),
    Package(Identifier),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfUpdate => f.write_str("qbe"),
            Self::Mcu(name) => write!(f, "mcus.{name}"),
            Self::Package(id) => write!(f, "requires.{id}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LockData {
    #[serde(default)]
    mcus: BTreeMap<String, Versioned>,
    #[serde(default)]
    qbe: Versioned,
    #[serde(default)]
    requires: BTreeMap<Identifier, Versioned>,
}

impl LockData {
    fn keys(&self) -> BTreeSet<LockKey> {
        self.mcus
            .keys()
            .cloned()
            .map(LockKey::Mcu)
            .chain(self.requires.keys().cloned().map(LockKey::Package))
            .collect()
    }
}

/// Entities added or dropped by [`LockStore::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub added: Vec<LockKey>,
    pub removed: Vec<LockKey>,
}

impl Reconciled {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
pub struct LockStore {
    path: PathBuf,
    data: LockData,
    lock: Arc<FileLock>,
}

impl LockStore {
    /// Load the store, creating an empty file when none exists.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock = FileLock::new(&path);
        if !path.exists() {
            tracing::info!(path = %path.display(), "creating lock file");
            let store = Self {
                path,
                data: LockData::default(),
                lock,
            };
            store.save()?;
            return Ok(store);
        }
        let data = read(&path)?;
        Ok(Self { path, data, lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the cross-process lock; fails fast when another process holds it.
    pub fn acquire(&self) -> Result<LockGuard> {
        Ok(self.lock.acquire()?)
    }

    pub fn save(&self) -> Result<()> {
        ConfigStore::new().save(&NormalizedPath::new(&self.path), &self.data)?;
        tracing::debug!(path = %self.path.display(), "lock file saved");
        Ok(())
    }

    /// The record for `key`, inserted with defaults when missing.
    pub fn always(&mut self, key: &LockKey) -> &mut Versioned {
        match key {
            LockKey::SelfUpdate => &mut self.data.qbe,
            LockKey::Mcu(name) => self.data.mcus.entry(name.clone()).or_default(),
            LockKey::Package(id) => self.data.requires.entry(id.clone()).or_default(),
        }
    }

    pub fn get(&self, key: &LockKey) -> Option<&Versioned> {
        match key {
            LockKey::SelfUpdate => Some(&self.data.qbe),
            LockKey::Mcu(name) => self.data.mcus.get(name),
            LockKey::Package(id) => self.data.requires.get(id),
        }
    }

    pub fn get_mut(&mut self, key: &LockKey) -> Option<&mut Versioned> {
        match key {
            LockKey::SelfUpdate => Some(&mut self.data.qbe),
            LockKey::Mcu(name) => self.data.mcus.get_mut(name),
            LockKey::Package(id) => self.data.requires.get_mut(id),
        }
    }

    /// Drop a record; the self-update record resets to defaults instead.
    pub fn remove(&mut self, key: &LockKey) -> Option<Versioned> {
        match key {
            LockKey::SelfUpdate => Some(std::mem::take(&mut self.data.qbe)),
            LockKey::Mcu(name) => self.data.mcus.remove(name),
            LockKey::Package(id) => self.data.requires.remove(id),
        }
    }

    pub fn requires(&self) -> impl Iterator<Item = (&Identifier, &Versioned)> {
        self.data.requires.iter()
    }

    pub fn mcus(&self) -> impl Iterator<Item = (&String, &Versioned)> {
        self.data.mcus.iter()
    }

    /// Recorded dependencies that are no longer declared.
    pub fn difference(&self, declared: &BTreeSet<Identifier>) -> Vec<Identifier> {
        self.data
            .requires
            .keys()
            .filter(|id| !declared.contains(*id))
            .cloned()
            .collect()
    }

    /// Re-read the file and merge it into the live store.
    ///
    /// Records only on disk are adopted, records no longer on disk are
    /// dropped, and records in both are merged field by field.
    pub fn update(&mut self) -> Result<Reconciled> {
        let stored = if self.path.exists() {
            read(&self.path)?
        } else {
            LockData::default()
        };

        let before = self.data.keys();
        let after = stored.keys();
        let reconciled = Reconciled {
            added: after.difference(&before).cloned().collect(),
            removed: before.difference(&after).cloned().collect(),
        };

        let LockData { mcus, qbe, requires } = stored;
        merge_map(&mut self.data.mcus, mcus);
        merge_map(&mut self.data.requires, requires);
        self.data.qbe.merge_from(qbe);

        if !reconciled.is_empty() {
            tracing::info!(
                added = reconciled.added.len(),
                removed = reconciled.removed.len(),
                "lock file reconciled"
            );
        }
        Ok(reconciled)
    }
}

fn merge_map<K: Ord + Clone>(live: &mut BTreeMap<K, Versioned>, stored: BTreeMap<K, Versioned>) {
    live.retain(|key, _| stored.contains_key(key));
    for (key, record) in stored {
        match live.get_mut(&key) {
            Some(existing) => existing.merge_from(record),
            None => {
                live.insert(key, record);
            }
        }
    }
}

fn read(path: &Path) -> Result<LockData> {
    let content = io::read_text(&NormalizedPath::new(path))?;
    if content.trim().is_empty() {
        return Ok(LockData::default());
    }
    serde_yaml::from_str(&content).map_err(|e| Error::LockDecode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn package(url: &str) -> LockKey {
        LockKey::Package(Identifier::new("git", url))
    }

    #[test]
    fn load_bootstraps_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".fleet.lock");
        let store = LockStore::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.requires().count(), 0);
    }

    #[test]
    fn always_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let mut store = LockStore::load(dir.path().join(".fleet.lock")).unwrap();
        let key = package("https://x/a.git");

        store.always(&key).current_version = "v1".into();
        assert_eq!(store.always(&key).current_version, "v1");
        assert_eq!(store.requires().count(), 1);
    }

    #[test]
    fn undecodable_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".fleet.lock");
        std::fs::write(&path, "requires: [not, a, map]\n").unwrap();
        assert!(matches!(LockStore::load(&path), Err(Error::LockDecode { .. })));
    }

    #[test]
    fn difference_lists_undeclared() {
        let dir = TempDir::new().unwrap();
        let mut store = LockStore::load(dir.path().join(".fleet.lock")).unwrap();
        store.always(&package("a"));
        store.always(&package("b"));

        let declared = BTreeSet::from([Identifier::new("git", "a")]);
        assert_eq!(store.difference(&declared), vec![Identifier::new("git", "b")]);
    }

    #[test]
    fn save_then_load_keeps_everything() {
        use chrono::{TimeZone, Utc};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".fleet.lock");
        let mut store = LockStore::load(&path).unwrap();
        let key = LockKey::Package(Identifier::new("git", "https://github.com/acme/macros.git#stable"));

        let record = store.always(&key);
        record.refresh_time = Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());
        record.current_version = "v1.0-2-g0badcafe".into();
        record.remote_version = "v1.1-0-gdeadbeef".into();
        record.status = Status::Updating;
        record.last_error = Some("Command `git fetch` failed\nfatal: unable to access".into());
        record.commits_behind = vec![
            TaggedCommit {
                sha: "deadbeef".repeat(5),
                author: "Ada".into(),
                date: 1_714_566_600,
                subject: "Raise hop".into(),
                message: "Longer body\n\nwith: colons and # hashes".into(),
                tag: Some("v1.1".into()),
            },
            TaggedCommit {
                sha: "0badcafe".repeat(5),
                author: "Ada".into(),
                date: 1_714_480_200,
                subject: "Hop before parking".into(),
                message: String::new(),
                tag: None,
            },
        ];
        record.current_options.insert("camera".into(), serde_json::json!(true));
        record.recipe_hash_installed = Some("abc".into());
        record.recipe_hash_current = Some("def".into());
        let mut entry = Entry::new(
            vec!["link".into()],
            Some("macros.cfg".into()),
            Some("/home/pi/macros.cfg".into()),
        );
        entry.metadata.insert("mode".into(), serde_json::json!("0644"));
        record.provided.by("user-config").notice(entry);
        record.provided.by("pip-app").notice(Entry::new(vec!["pip".into(), "setup".into()], None, None));

        let mcu = store.always(&LockKey::Mcu("ebb36".into()));
        mcu.current_version = "v0.12.0-100-g12345678".into();
        mcu.status = Status::Finished;
        store.always(&LockKey::SelfUpdate).remote_version = "v2.0-0-g87654321".into();
        store.save().unwrap();

        let loaded = LockStore::load(&path).unwrap();

        assert_eq!(loaded.data, store.data);
        let entries: Vec<&Entry> = loaded.get(&key).unwrap().provided.get("user-config").unwrap().all().collect();
        assert_eq!(entries[0].metadata.get("mode"), Some(&serde_json::json!("0644")));
        assert_eq!(loaded.get(&key).unwrap().commits_behind[0].tag.as_deref(), Some("v1.1"));
    }

    #[test]
    fn update_merges_external_edits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".fleet.lock");
        let mut live = LockStore::load(&path).unwrap();
        live.always(&package("a")).status = Status::Finished;
        live.always(&package("c"));
        live.save().unwrap();
        live.always(&package("a")).status = Status::Updating;

        let mut other = LockStore::load(&path).unwrap();
        other.always(&package("a")).remote_version = "v2".into();
        other.remove(&package("c"));
        other.always(&package("b")).current_version = "v1".into();
        other.always(&LockKey::Mcu("ebb36".into()));
        other.save().unwrap();

        let reconciled = live.update().unwrap();

        assert_eq!(
            reconciled,
            Reconciled {
                added: vec![LockKey::Mcu("ebb36".into()), package("b")],
                removed: vec![package("c")],
            }
        );
        let a = live.get(&package("a")).unwrap();
        assert_eq!(a.remote_version, "v2");
        assert_eq!(a.status, Status::Updating);
        assert_eq!(live.get(&package("b")).unwrap().current_version, "v1");
        assert!(live.get(&package("c")).is_none());

        assert!(live.update().unwrap().is_empty());
    }

    #[test]
    fn removing_self_update_resets_it() {
        let dir = TempDir::new().unwrap();
        let mut store = LockStore::load(dir.path().join(".fleet.lock")).unwrap();
        store.always(&LockKey::SelfUpdate).current_version = "v3".into();
        store.remove(&LockKey::SelfUpdate);
        assert_eq!(store.get(&LockKey::SelfUpdate), Some(&Versioned::default()));
    }
}
