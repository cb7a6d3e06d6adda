//! Provenance: what each provider produced for an entity.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One artifact a provider produced.
///
/// Identity is `(path, input, output)`; `metadata` is descriptive and
/// ignored by comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Which group and field produced it, e.g. `["link"]` or `["pip", "setup"]`
    pub path: Vec<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Entry {
    pub fn new(path: Vec<String>, input: Option<String>, output: Option<String>) -> Self {
        Self {
            path,
            input,
            output,
            metadata: Metadata::new(),
        }
    }

    /// First path segment: the operation group or provider field.
    pub fn group(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }

    fn key(&self) -> (&[String], &Option<String>, &Option<String>) {
        (&self.path, &self.input, &self.output)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Entries of one provider: everything recorded so far (`all`) and what
/// the current pass touched (`current`).
#[derive(Debug, Clone, Default)]
pub struct ProviderProvided {
    store: BTreeSet<Entry>,
    current: BTreeSet<Entry>,
}

impl ProviderProvided {
    /// Forget what the previous pass touched.
    pub fn start_pass(&mut self) {
        self.current.clear();
    }

    /// Record an entry as produced during this pass.
    pub fn notice(&mut self, entry: Entry) {
        self.store.replace(entry.clone());
        self.current.replace(entry);
    }

    pub fn forget(&mut self, entry: &Entry) {
        self.store.remove(entry);
        self.current.remove(entry);
    }

    pub fn all(&self) -> impl Iterator<Item = &Entry> {
        self.store.iter()
    }

    /// Recorded entries the current pass did not produce.
    pub fn untouched(&self) -> Vec<Entry> {
        self.store.difference(&self.current).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }
}

impl PartialEq for ProviderProvided {
    fn eq(&self, other: &Self) -> bool {
        self.store == other.store
    }
}

impl Serialize for ProviderProvided {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.store)
    }
}

impl<'de> Deserialize<'de> for ProviderProvided {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(Self {
            store: entries.into_iter().collect(),
            current: BTreeSet::new(),
        })
    }
}

/// Provenance of one entity, keyed by provider discriminator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Provided {
    buckets: BTreeMap<String, ProviderProvided>,
}

impl Provided {
    /// The bucket for `provider`, created when missing.
    pub fn by(&mut self, provider: &str) -> &mut ProviderProvided {
        self.buckets.entry(provider.to_string()).or_default()
    }

    pub fn get(&self, provider: &str) -> Option<&ProviderProvided> {
        self.buckets.get(provider)
    }

    /// Whether `provider` has recorded anything.
    pub fn has(&self, provider: &str) -> bool {
        self.buckets.get(provider).is_some_and(|b| !b.is_empty())
    }

    /// Detach a provider's bucket for the duration of one apply or remove.
    pub fn take(&mut self, provider: &str) -> ProviderProvided {
        self.buckets.remove(provider).unwrap_or_default()
    }

    pub fn restore(&mut self, provider: &str, bucket: ProviderProvided) {
        self.buckets.insert(provider.to_string(), bucket);
    }

    /// Providers with recorded entries.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.buckets
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(ProviderProvided::is_empty)
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(ProviderProvided::len).sum()
    }
}

impl Serialize for Provided {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.buckets.iter().filter(|(_, b)| !b.is_empty()))
    }
}

impl<'de> Deserialize<'de> for Provided {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let buckets = Option::<BTreeMap<String, ProviderProvided>>::deserialize(deserializer)?;
        Ok(Self {
            buckets: buckets.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(group: &str, output: &str) -> Entry {
        Entry::new(vec![group.into()], Some("src".into()), Some(output.into()))
    }

    #[test]
    fn equality_ignores_metadata() {
        let mut a = entry("link", "/a");
        a.metadata.insert("mode".into(), serde_json::json!("0644"));
        assert_eq!(a, entry("link", "/a"));
        assert!(a != entry("link", "/b"));
    }

    #[test]
    fn untouched_is_store_minus_current() {
        let yaml = "- path: [link]\n  input: src\n  output: /a\n  metadata: {}\n- path: [link]\n  input: src\n  output: /b\n  metadata: {}\n";
        let mut bucket: ProviderProvided = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(bucket.untouched().len(), 2);

        bucket.notice(entry("link", "/a"));
        assert_eq!(bucket.untouched(), vec![entry("link", "/b")]);

        bucket.forget(&entry("link", "/b"));
        assert!(bucket.untouched().is_empty());
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn by_is_idempotent_and_empty_buckets_are_not_encoded() {
        let mut provided = Provided::default();
        provided.by("user-config");
        provided.by("user-config").notice(entry("link", "/a"));
        provided.by("pip-app");

        assert_eq!(provided.providers().collect::<Vec<_>>(), vec!["user-config"]);
        let yaml = serde_yaml::to_string(&provided).unwrap();
        assert!(!yaml.contains("pip-app"), "{yaml}");
        assert!(provided.has("user-config"));
        assert!(!provided.has("pip-app"));
    }
}
