//! Path references in manifests.
//!
//! A plain string is relative to the package checkout, `!PKG <path>` is
//! relative to the bundled package definition, and `!VAR <dotted.key>` is
//! looked up in the entity's template context.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;
use serde_yaml::value::{Tag, TaggedValue};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathRef {
    Plain(String),
    Package(String),
    Var(String),
}

impl PathRef {
    /// The raw string regardless of kind.
    pub fn raw(&self) -> &str {
        match self {
            Self::Plain(s) | Self::Package(s) | Self::Var(s) => s,
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Self::Var(_))
    }

    pub fn is_package(&self) -> bool {
        matches!(self, Self::Package(_))
    }

    /// Resolve a `!VAR` dotted key against a template context.
    ///
    /// Returns `None` for other kinds or when any segment is missing.
    pub fn lookup(&self, context: &serde_json::Value) -> Option<String> {
        let Self::Var(key) = self else {
            return None;
        };
        let mut current = context;
        for segment in key.split('.') {
            current = current.get(segment)?;
        }
        match current {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub(crate) fn from_value(value: &Value) -> crate::Result<Self> {
        match value {
            Value::String(s) => Ok(Self::Plain(s.clone())),
            Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                let Value::String(inner) = &tagged.value else {
                    return Err(crate::Error::invalid("path reference", format!("{tag} expects a string")));
                };
                match tag.trim_start_matches('!') {
                    "PKG" => Ok(Self::Package(inner.clone())),
                    "VAR" => Ok(Self::Var(inner.clone())),
                    other => Err(crate::Error::invalid("path reference", format!("unknown tag !{other}"))),
                }
            }
            other => Err(crate::Error::invalid(
                "path reference",
                format!("expected a string, got {other:?}"),
            )),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        let tagged = |tag: &str, inner: &str| {
            Value::Tagged(Box::new(TaggedValue {
                tag: Tag::new(tag),
                value: Value::String(inner.to_string()),
            }))
        };
        match self {
            Self::Plain(s) => Value::String(s.clone()),
            Self::Package(s) => tagged("PKG", s),
            Self::Var(s) => tagged("VAR", s),
        }
    }
}

impl fmt::Display for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw())
    }
}

impl Serialize for PathRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PathRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}
