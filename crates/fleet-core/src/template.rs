//! Template rendering seam and the entity render context.
//!
//! Manifests render unit files, templates and messages against a context of
//! `user`, `paths`, `dirs` and `options`. The renderer is a trait so a full
//! template engine can be plugged in; the built-in one substitutes
//! `{{ dotted.key }}` placeholders.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use fleet_meta::Options;
use regex::{Captures, Regex};
use serde_json::{Map, Value, json};

use crate::settings::Settings;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("Invalid placeholder regex"));

pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> String;
}

/// Substitutes `{{ key }}` and `{{ a.b.c }}`; unknown keys render empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl Renderer for PlaceholderRenderer {
    fn render(&self, template: &str, context: &Value) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                match lookup(context, &caps[1]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                }
            })
            .into_owned()
    }
}

/// Follow a dotted key through nested objects.
pub fn lookup<'a>(context: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(context, |current, segment| current.get(segment))
}

/// Build the render context of one entity.
pub fn context(settings: &Settings, pkg: &Path, venv: &Path, options: &Options) -> Value {
    let mut paths = Map::new();
    for (key, path) in [
        ("config_root", &settings.config_root),
        ("packages", &settings.packages_dir),
        ("venvs", &settings.venvs_dir),
        ("firmwares", &settings.firmware_dir),
        ("python", &settings.python),
        ("fleet", &settings.self_dir),
    ] {
        paths.insert(key.to_string(), Value::String(path.display().to_string()));
    }
    for target in &settings.operation_targets {
        paths.insert(
            target.name.replace('-', "_"),
            Value::String(target.target.display().to_string()),
        );
    }

    json!({
        "user": current_user(),
        "paths": paths,
        "dirs": {
            "pkg": pkg.display().to_string(),
            "venv": venv.display().to_string(),
        },
        "options": options,
    })
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

/// Flatten a context into environment variables: `{dirs: {pkg}}` becomes
/// `<PREFIX>DIRS_PKG`. Nulls are skipped.
pub fn to_env(context: &Value, prefix: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    flatten(context, prefix, &mut env);
    env
}

fn flatten(value: &Value, prefix: &str, env: &mut BTreeMap<String, String>) {
    let Value::Object(map) = value else {
        return;
    };
    for (key, value) in map {
        let name = format!("{prefix}{}", key.to_uppercase().replace('-', "_"));
        match value {
            Value::Null => {}
            Value::Object(_) => flatten(value, &format!("{name}_"), env),
            Value::String(s) => {
                env.insert(name, s.clone());
            }
            other => {
                env.insert(name, other.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_nested_placeholders() {
        let context = json!({"dirs": {"venv": "/var/opt/x"}, "options": {"port": 7125}});
        let out = PlaceholderRenderer.render(
            "ExecStart={{dirs.venv}}/bin/python --port {{ options.port }}{{ missing }}",
            &context,
        );
        assert_eq!(out, "ExecStart=/var/opt/x/bin/python --port 7125");
    }

    #[test]
    fn env_flattens_with_prefix() {
        let context = json!({"user": "pi", "dirs": {"pkg": "/opt/x"}, "options": {"camera": true, "none": null}});
        let env = to_env(&context, "FLEET_");
        assert_eq!(env.get("FLEET_USER").map(String::as_str), Some("pi"));
        assert_eq!(env.get("FLEET_DIRS_PKG").map(String::as_str), Some("/opt/x"));
        assert_eq!(env.get("FLEET_OPTIONS_CAMERA").map(String::as_str), Some("true"));
        assert!(!env.contains_key("FLEET_OPTIONS_NONE"));
    }

    #[test]
    fn context_exposes_operation_targets() {
        let settings = Settings::rooted_at(Path::new("/home/pi"), Path::new("/opt"), Path::new("/var/opt"));
        let ctx = context(&settings, Path::new("/opt/pkg"), Path::new("/var/opt/pkg"), &Options::new());
        assert_eq!(
            lookup(&ctx, "paths.klipper_config"),
            Some(&Value::String("/home/pi/config".into()))
        );
        assert_eq!(lookup(&ctx, "dirs.pkg"), Some(&Value::String("/opt/pkg".into())));
    }
}
