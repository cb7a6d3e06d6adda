//! Per-entity version, status and provenance record.

use chrono::{DateTime, TimeZone, Utc};
use fleet_git::CommitInfo;
use fleet_meta::Options;
use serde::{Deserialize, Serialize};

use super::provided::Provided;

/// Version placeholder for "not known".
pub const UNKNOWN_VERSION: &str = "?";

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Unknown,
    Started,
    Updating,
    Installing,
    Removing,
    Finished,
}

impl Status {
    /// A lifecycle began and did not complete.
    pub fn unfinished(self) -> bool {
        matches!(self, Self::Started | Self::Updating | Self::Installing)
    }
}

/// One upstream commit the entity is behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedCommit {
    pub sha: String,
    pub author: String,
    /// Seconds since the epoch
    pub date: i64,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub tag: Option<String>,
}

impl From<CommitInfo> for TaggedCommit {
    fn from(commit: CommitInfo) -> Self {
        Self {
            sha: commit.sha,
            author: commit.author,
            date: commit.date,
            subject: commit.subject,
            message: commit.message,
            tag: commit.tag,
        }
    }
}

fn unknown_version() -> String {
    UNKNOWN_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    #[serde(default, with = "refresh_time", skip_serializing_if = "Option::is_none")]
    pub refresh_time: Option<DateTime<Utc>>,
    #[serde(default = "unknown_version")]
    pub current_version: String,
    #[serde(default = "unknown_version")]
    pub remote_version: String,
    #[serde(default)]
    pub commits_behind: Vec<TaggedCommit>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub provided: Provided,
    #[serde(
        rename = "current-options",
        alias = "current_options",
        default,
        skip_serializing_if = "Options::is_empty"
    )]
    pub current_options: Options,
    #[serde(
        rename = "recipe-hash-installed",
        alias = "recipie-hash-installed",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub recipe_hash_installed: Option<String>,
    #[serde(
        rename = "recipe-hash-current",
        alias = "recipie-hash-current",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub recipe_hash_current: Option<String>,
}

impl Default for Versioned {
    fn default() -> Self {
        Self {
            refresh_time: None,
            current_version: unknown_version(),
            remote_version: unknown_version(),
            commits_behind: Vec::new(),
            last_error: None,
            status: Status::Unknown,
            provided: Provided::default(),
            current_options: Options::new(),
            recipe_hash_installed: None,
            recipe_hash_current: None,
        }
    }
}

impl Versioned {
    pub fn is_installed(&self) -> bool {
        !self.provided.is_empty() || self.current_version != UNKNOWN_VERSION
    }

    /// Both versions known and equal.
    pub fn is_up_to_date(&self) -> bool {
        self.current_version != UNKNOWN_VERSION && self.current_version == self.remote_version
    }

    pub fn options_dirty(&self, declared: &Options) -> bool {
        &self.current_options != declared
    }

    pub fn recipe_dirty(&self) -> bool {
        self.recipe_hash_installed != self.recipe_hash_current
    }

    pub fn touch(&mut self) {
        self.refresh_time = Some(Utc::now());
    }

    /// Adopt the stored state written by another process.
    ///
    /// Every persisted field is taken from `stored` except `status` while a
    /// lifecycle is in flight here.
    pub fn merge_from(&mut self, stored: Versioned) {
        let in_flight = self.status.unfinished() || self.status == Status::Removing;
        let status = if in_flight { self.status } else { stored.status };
        *self = Self { status, ..stored };
    }
}

/// `refresh_time` is RFC 3339; older files stored float epoch seconds.
mod refresh_time {
    use super::*;
    use serde::{Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.serialize_str(&time.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        struct Visitor;

        impl<'de> de::Visitor<'de> for Visitor {
            type Value = Option<DateTime<Utc>>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an RFC 3339 timestamp or epoch seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                DateTime::parse_from_rfc3339(v)
                    .map(|t| Some(t.with_timezone(&Utc)))
                    .map_err(E::custom)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if v <= 0.0 {
                    return Ok(None);
                }
                let secs = v.trunc() as i64;
                let nanos = (v.fract() * 1e9) as u32;
                Ok(Utc.timestamp_opt(secs, nanos).single())
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                self.visit_f64(v as f64)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                self.visit_f64(v as f64)
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}
