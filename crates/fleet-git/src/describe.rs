//! `describe`-style version strings: `<tag>-<n>-g<sha8>[-dirty]`, or the
//! bare abbreviated sha when no tag is reachable.

use std::sync::LazyLock;

use git2::{DescribeFormatOptions, DescribeOptions, Oid};
use regex::Regex;

use crate::{Checkout, Error, Result};

const ABBREV: u32 = 8;

static BARE_SHA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([a-f0-9]{8})$").expect("Invalid sha regex"));
static DESCRIBED_SHA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-g([a-f0-9]{8})(?:-dirty)?$").expect("Invalid describe regex"));

fn options() -> DescribeOptions {
    let mut options = DescribeOptions::new();
    options.describe_tags().show_commit_oid_as_fallback(true);
    options
}

fn format_options(dirty: bool) -> DescribeFormatOptions {
    let mut format = DescribeFormatOptions::new();
    format.abbreviated_size(ABBREV).always_use_long_format(true);
    if dirty {
        format.dirty_suffix("-dirty");
    }
    format
}

impl Checkout {
    /// Version of the working tree, suffixed `-dirty` when modified.
    pub fn describe_workdir(&self) -> Result<String> {
        let describe = self.repo().describe(&options())?;
        Ok(describe.format(Some(&format_options(true)))?)
    }

    /// Version of an arbitrary commit.
    pub fn describe_commit(&self, oid: Oid) -> Result<String> {
        let commit = self.repo().find_commit(oid)?;
        let describe = commit.as_object().describe(&options())?;
        Ok(describe.format(Some(&format_options(false)))?)
    }
}

/// Extract the abbreviated commit from a recorded version string.
///
/// Accepts a bare `<sha8>` or anything ending in `-g<sha8>`.
pub fn commit_of_version(version: &str) -> Result<String> {
    [&*BARE_SHA, &*DESCRIBED_SHA]
        .iter()
        .find_map(|re| re.captures(version))
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| Error::InvalidVersion {
            version: version.to_string(),
        })
}
