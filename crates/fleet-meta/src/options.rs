//! Option sets and the `only`/`unless` predicates evaluated against them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Options a dependency is declared with, e.g. `{ camera: true }`.
pub type Options = BTreeMap<String, serde_json::Value>;

/// `only`: every listed option must equal its value.
/// `unless`: no listed option may equal its value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub only: Options,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unless: Options,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.only.is_empty() && self.unless.is_empty()
    }

    /// Whether an entry guarded by this predicate applies under `options`.
    ///
    /// A missing option never equals a listed value.
    pub fn available(&self, options: &Options) -> bool {
        let only = self
            .only
            .iter()
            .all(|(key, state)| options.get(key) == Some(state));
        let unless = self
            .unless
            .iter()
            .any(|(key, state)| options.get(key) == Some(state));
        only && !unless
    }

    pub(crate) fn from_mapping(mapping: &serde_yaml::Mapping) -> crate::Result<Self> {
        let decode = |key: &str| -> crate::Result<Options> {
            match mapping.get(key) {
                None | Some(serde_yaml::Value::Null) => Ok(Options::new()),
                Some(value) => serde_yaml::from_value(value.clone())
                    .map_err(|e| crate::Error::invalid("option predicate", e.to_string())),
            }
        };
        Ok(Self {
            only: decode("only")?,
            unless: decode("unless")?,
        })
    }
}
