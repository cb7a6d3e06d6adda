//! Backlog computation against a cloned upstream

use fleet_git::{Checkout, MAX_COMMITS};
use fleet_test_utils::git::UpstreamRepo;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn clone(upstream: &UpstreamRepo, dir: &std::path::Path) -> Checkout {
    Checkout::init_from_remote(&dir.join("local"), &upstream.url(), "main", &mut |_| {}).unwrap()
}

#[test]
fn three_commits_behind_newest_first_with_tag() {
    let dir = tempdir().unwrap();
    let upstream = UpstreamRepo::with_files(&dir.path().join("upstream"), &[("README.md", "v0")]);
    let checkout = clone(&upstream, dir.path());

    let c0 = upstream.commit_file("README.md", "c0", "c0");
    let c1 = upstream.commit_file("README.md", "c1", "c1");
    let c2 = upstream.commit_file("README.md", "c2", "c2");
    upstream.tag("v1.1", c2);

    checkout.fetch(&mut |_| {}).unwrap();
    let tip = checkout.remote_tip("main").unwrap();
    let head = checkout.head().unwrap();

    assert_eq!(checkout.count_between(head, tip).unwrap(), 3);

    let backlog = checkout.backlog(head, tip, &[]).unwrap();
    let shas: Vec<_> = backlog.iter().map(|c| c.sha.clone()).collect();
    assert_eq!(shas, vec![c2.to_string(), c1.to_string(), c0.to_string()]);
    assert_eq!(backlog[0].tag.as_deref(), Some("v1.1"));
    assert_eq!(backlog[0].subject, "c2");
    assert_eq!(backlog[0].author, "Test User");
    assert!(backlog[1].tag.is_none());
}

#[test]
fn tagged_commits_beyond_cap_are_kept() {
    let dir = tempdir().unwrap();
    let upstream = UpstreamRepo::with_files(&dir.path().join("upstream"), &[("n", "0")]);
    let checkout = clone(&upstream, dir.path());

    let oldest = upstream.commit_file("n", "1", "release");
    upstream.annotated_tag("v2.0.0", oldest);
    for i in 0..MAX_COMMITS + 5 {
        upstream.commit_file("n", &format!("{}", i + 2), &format!("commit {i}"));
    }

    checkout.fetch(&mut |_| {}).unwrap();
    let tip = checkout.remote_tip("main").unwrap();
    let backlog = checkout.backlog(checkout.head().unwrap(), tip, &[]).unwrap();

    assert_eq!(backlog.len(), MAX_COMMITS + 1);
    let last = backlog.last().unwrap();
    assert_eq!(last.sha, oldest.to_string());
    assert_eq!(last.tag.as_deref(), Some("v2.0.0"));
}

#[test]
fn path_filter_skips_unrelated_commits() {
    let dir = tempdir().unwrap();
    let upstream = UpstreamRepo::with_files(&dir.path().join("upstream"), &[("src/main.c", "int main;"), ("docs.md", "")]);
    let checkout = clone(&upstream, dir.path());
    let base = checkout.head().unwrap();

    upstream.commit_file("docs.md", "words", "Docs only");
    let firmware = upstream.commit_file("src/main.c", "int main(void);", "Fix firmware");

    checkout.fetch(&mut |_| {}).unwrap();
    let tip = checkout.remote_tip("main").unwrap();
    let backlog = checkout.backlog(base, tip, &["src", "lib", "Makefile"]).unwrap();

    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].sha, firmware.to_string());
}

#[test]
fn up_to_date_checkout_has_empty_backlog() {
    let dir = tempdir().unwrap();
    let upstream = UpstreamRepo::with_files(&dir.path().join("upstream"), &[("a", "1")]);
    let checkout = clone(&upstream, dir.path());
    let head = checkout.head().unwrap();

    assert!(checkout.backlog(head, head, &[]).unwrap().is_empty());
}
