//! Display names for entities.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use fleet_meta::PackageType;
use regex::Regex;

static WORD_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_ ]+").expect("Invalid word separator regex"));

/// Preferred spellings for words in package names (`Klipperscreen` ->
/// `KlipperScreen`), keyed case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct NiceNames {
    names: HashMap<String, String>,
}

impl NiceNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !n.is_empty())
            .map(|n| (n.to_lowercase(), n))
            .collect();
        Self { names }
    }

    /// One name per line; a missing file yields an empty table.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::new(content.lines()),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no nice names table");
                Self::default()
            }
        }
    }

    pub fn get<'a>(&'a self, word: &'a str) -> &'a str {
        self.names.get(&word.to_lowercase()).map(String::as_str).unwrap_or(word)
    }

    /// `klipper_screen-theme` -> `KlipperScreen Theme`, prefixed with the
    /// package type when it has one (`Config :: Printer Macros`).
    pub fn display_name(&self, name: &str, kind: Option<PackageType>) -> String {
        let words: Vec<String> = WORD_SEPARATOR
            .split(name)
            .filter(|w| !w.trim().is_empty())
            .map(|w| self.get(&capitalize(w.trim())).to_string())
            .collect();
        let name = words.join(" ");

        match kind.and_then(|k| k.label()) {
            Some(label) => format!("{label} :: {name}"),
            None => name,
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("klipper-macros", None, "Klipper Macros")]
    #[case("klipperscreen_theme", Some(PackageType::Config), "Config :: KlipperScreen Theme")]
    #[case("moonraker timelapse", Some(PackageType::Package), "Moonraker Timelapse")]
    #[case("MAINSAIL", Some(PackageType::Service), "Service :: Mainsail")]
    fn display_names(#[case] name: &str, #[case] kind: Option<PackageType>, #[case] expected: &str) {
        let names = NiceNames::new(["KlipperScreen", "", "  "]);
        assert_eq!(names.display_name(name, kind), expected);
    }
}
