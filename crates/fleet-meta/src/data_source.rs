//! Where a package's files come from.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};

pub const DEFAULT_BRANCH: &str = "master";

/// Origin of a package, keyed by whichever of `git`, `local`, `zip` or
/// `internal` is present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataSourceSpec {
    Git { url: String, branch: String },
    Local { path: String },
    Zip { url: String },
    Internal { name: String },
}

impl DataSourceSpec {
    pub fn git(url: impl Into<String>) -> Self {
        Self::Git {
            url: url.into(),
            branch: DEFAULT_BRANCH.to_string(),
        }
    }

    /// The discriminator key, also used as identifier type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Git { .. } => "git",
            Self::Local { .. } => "local",
            Self::Zip { .. } => "zip",
            Self::Internal { .. } => "internal",
        }
    }

    /// The identifier id: url, path or bundled name.
    pub fn id(&self) -> &str {
        match self {
            Self::Git { url, .. } | Self::Zip { url } => url,
            Self::Local { path } => path,
            Self::Internal { name } => name,
        }
    }

    pub(crate) fn from_mapping(map: &Mapping) -> crate::Result<Self> {
        let text = |key: &str| -> Option<String> {
            match map.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };
        if let Some(url) = text("git") {
            Ok(Self::Git {
                url,
                branch: text("branch").unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            })
        } else if let Some(path) = text("local") {
            Ok(Self::Local { path })
        } else if let Some(url) = text("zip") {
            Ok(Self::Zip { url })
        } else if let Some(name) = text("internal") {
            Ok(Self::Internal { name })
        } else {
            Err(crate::Error::unknown("data source", &Value::Mapping(map.clone())))
        }
    }

    pub(crate) fn to_mapping(&self) -> Mapping {
        let mut map = Mapping::new();
        map.insert(self.kind().into(), self.id().into());
        match self {
            Self::Git { branch, .. } if branch != DEFAULT_BRANCH => {
                map.insert("branch".into(), branch.as_str().into());
            }
            _ => {}
        }
        map
    }
}

impl Serialize for DataSourceSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_mapping().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataSourceSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Mapping::deserialize(deserializer)?;
        Self::from_mapping(&map).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("git: https://github.com/acme/macros.git", DataSourceSpec::git("https://github.com/acme/macros.git"))]
    #[case("git: https://x/y.git\nbranch: main", DataSourceSpec::Git { url: "https://x/y.git".into(), branch: "main".into() })]
    #[case("local: /home/pi/pkg", DataSourceSpec::Local { path: "/home/pi/pkg".into() })]
    #[case("zip: https://github.com/acme/ui", DataSourceSpec::Zip { url: "https://github.com/acme/ui".into() })]
    #[case("internal: fleet", DataSourceSpec::Internal { name: "fleet".into() })]
    fn decodes_by_discriminator(#[case] yaml: &str, #[case] expected: DataSourceSpec) {
        let spec: DataSourceSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec, expected);
        let back: DataSourceSpec = serde_yaml::from_str(&serde_yaml::to_string(&spec).unwrap()).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn default_branch_is_omitted() {
        let yaml = serde_yaml::to_string(&DataSourceSpec::git("u")).unwrap();
        assert_eq!(yaml.trim(), "git: u");
    }

    #[test]
    fn unknown_source_is_fatal() {
        assert!(serde_yaml::from_str::<DataSourceSpec>("svn: http://x").is_err());
    }
}
