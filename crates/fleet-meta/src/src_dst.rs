//! Source/destination pairs used by operation providers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};

use crate::options::Predicate;
use crate::path_ref::PathRef;

/// One declared operation: copy/link/render `source` to `target`.
///
/// Accepted forms:
///
/// ```yaml
/// - config/printer.cfg                      # same path on both sides
/// - !PKG macros.cfg                         # package file, same relative target
/// - [config/a.cfg, printer/a.cfg]
/// - { source: a.cfg, target: !VAR paths.moonraker, only: { camera: true } }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SrcDst {
    pub source: PathRef,
    pub target: PathRef,
    pub predicate: Predicate,
}

impl SrcDst {
    pub fn new(source: PathRef, target: PathRef) -> Self {
        Self {
            source,
            target,
            predicate: Predicate::default(),
        }
    }

    fn from_value(value: &Value) -> crate::Result<Self> {
        match value {
            Value::String(_) | Value::Tagged(_) => {
                let source = PathRef::from_value(value)?;
                let target = PathRef::Plain(source.raw().to_string());
                Ok(Self::new(source, target))
            }
            Value::Sequence(pair) if pair.len() == 2 => Ok(Self::new(
                PathRef::from_value(&pair[0])?,
                PathRef::from_value(&pair[1])?,
            )),
            Value::Mapping(map) => Self::from_mapping(map),
            other => Err(crate::Error::invalid(
                "operation entry",
                format!("{other:?}"),
            )),
        }
    }

    fn from_mapping(map: &Mapping) -> crate::Result<Self> {
        let (Some(source), Some(target)) = (map.get("source"), map.get("target")) else {
            return Err(crate::Error::invalid(
                "operation entry",
                "a mapping needs both 'source' and 'target'",
            ));
        };
        Ok(Self {
            source: PathRef::from_value(source)?,
            target: PathRef::from_value(target)?,
            predicate: Predicate::from_mapping(map)?,
        })
    }

    fn to_value(&self) -> Value {
        if self.predicate.is_empty() {
            if self.target == PathRef::Plain(self.source.raw().to_string()) {
                return self.source.to_value();
            }
            return Value::Sequence(vec![self.source.to_value(), self.target.to_value()]);
        }
        let mut map = Mapping::new();
        map.insert("source".into(), self.source.to_value());
        map.insert("target".into(), self.target.to_value());
        for (key, options) in [("only", &self.predicate.only), ("unless", &self.predicate.unless)] {
            if !options.is_empty() {
                let value = serde_yaml::to_value(options).unwrap_or(Value::Null);
                map.insert(key.into(), value);
            }
        }
        Value::Mapping(map)
    }
}

impl Serialize for SrcDst {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SrcDst {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plain(s: &str) -> PathRef {
        PathRef::Plain(s.to_string())
    }

    #[test]
    fn decodes_every_form() {
        let yaml = r#"
- printer.cfg
- !PKG macros.cfg
- [a.cfg, config/a.cfg]
- source: cam.cfg
  target: !VAR paths.moonraker
  only:
    camera: true
"#;
        let entries: Vec<SrcDst> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entries[0], SrcDst::new(plain("printer.cfg"), plain("printer.cfg")));
        assert_eq!(
            entries[1],
            SrcDst::new(PathRef::Package("macros.cfg".into()), plain("macros.cfg"))
        );
        assert_eq!(entries[2], SrcDst::new(plain("a.cfg"), plain("config/a.cfg")));
        assert_eq!(entries[3].target, PathRef::Var("paths.moonraker".into()));
        assert_eq!(entries[3].predicate.only["camera"], serde_json::json!(true));
    }

    #[test]
    fn encodes_compact_forms() {
        let same = SrcDst::new(plain("a.cfg"), plain("a.cfg"));
        assert_eq!(serde_yaml::to_string(&same).unwrap().trim(), "a.cfg");

        let pair = SrcDst::new(plain("a.cfg"), plain("b.cfg"));
        assert_eq!(serde_yaml::to_string(&pair).unwrap(), "- a.cfg\n- b.cfg\n");
    }

    #[test]
    fn mapping_without_target_is_rejected() {
        assert!(serde_yaml::from_str::<SrcDst>("source: a.cfg").is_err());
        assert!(serde_yaml::from_str::<SrcDst>("42").is_err());
    }
}
