//! Remote inspection without a local checkout (`ls-remote`).

use std::cmp::Ordering;

use git2::{Direction, Oid, Remote};

use crate::{Error, Result};

/// Version of `branch` on `url`: `<latest tag>-g<sha8>`, or the bare
/// `<sha8>` when the remote carries no tags.
pub fn remote_version(url: &str, branch: &str) -> Result<String> {
    let refs = list_refs(url)?;

    let branch_ref = format!("refs/heads/{branch}");
    let (_, tip) = refs
        .iter()
        .find(|(name, _)| *name == branch_ref)
        .ok_or(Error::RefNotFound { name: branch_ref })?;
    let short = tip.to_string()[..8].to_string();

    let tags: Vec<&str> = refs
        .iter()
        .filter_map(|(name, _)| name.strip_prefix("refs/tags/"))
        .map(|name| name.trim_end_matches("^{}"))
        .collect();

    Ok(match latest_tag(&tags) {
        Some(tag) => format!("{tag}-g{short}"),
        None => short,
    })
}

fn list_refs(url: &str) -> Result<Vec<(String, Oid)>> {
    let mut remote = Remote::create_detached(url)?;
    remote.connect(Direction::Fetch)?;
    let refs = remote
        .list()?
        .iter()
        .map(|head| (head.name().to_string(), head.oid()))
        .collect();
    remote.disconnect()?;
    Ok(refs)
}

/// Highest tag in version order, as `ls-remote --sort=-v:refname` would list first.
pub fn latest_tag<'a>(tags: &[&'a str]) -> Option<&'a str> {
    tags.iter().copied().max_by(|a, b| version_order(a, b))
}

/// Compare two tag names by version.
///
/// Tags that read as versions (`v1.2`, `1.2.3-rc1`) sort above tags that
/// do not; ties and non-versions fall back to plain string order.
pub(crate) fn version_order(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

fn parse_version(tag: &str) -> Option<semver::Version> {
    let raw = tag.trim_start_matches(['v', 'V']);
    if let Ok(version) = semver::Version::parse(raw) {
        return Some(version);
    }

    // Pad `1` and `1.2` to three components.
    let (core, rest) = match raw.find(['-', '+']) {
        Some(idx) => raw.split_at(idx),
        None => (raw, ""),
    };
    let parts = core.split('.').count();
    if parts == 0 || parts > 2 {
        return None;
    }
    let padded = format!("{core}{}{rest}", ".0".repeat(3 - parts));
    semver::Version::parse(&padded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_test_utils::git::{UpstreamRepo, short};
    use rstest::rstest;

    #[rstest]
    #[case(&["v1.1", "v1.10", "v1.9"], "v1.10")]
    #[case(&["v0.12.0", "v0.11.0-rc1", "nightly"], "v0.12.0")]
    #[case(&["v2.0.0-beta", "v2.0.0"], "v2.0.0")]
    #[case(&["alpha", "beta"], "beta")]
    fn latest_tag_uses_version_order(#[case] tags: &[&str], #[case] expected: &str) {
        assert_eq!(latest_tag(tags), Some(expected));
    }

    #[test]
    fn latest_tag_of_nothing() {
        assert_eq!(latest_tag(&[]), None);
    }

    #[test]
    fn remote_version_with_and_without_tags() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = UpstreamRepo::with_files(&dir.path().join("up"), &[("a", "1")]);

        assert_eq!(remote_version(&upstream.url(), "main").unwrap(), short(upstream.head()));

        upstream.annotated_tag("v1.0", upstream.head());
        let next = upstream.commit_file("a", "2", "Next");
        assert_eq!(
            remote_version(&upstream.url(), "main").unwrap(),
            format!("v1.0-g{}", short(next))
        );
    }

    #[test]
    fn remote_version_missing_branch() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = UpstreamRepo::with_files(&dir.path().join("up"), &[("a", "1")]);

        assert!(matches!(
            remote_version(&upstream.url(), "master"),
            Err(Error::RefNotFound { .. })
        ));
    }
}
