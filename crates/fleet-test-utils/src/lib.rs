//! Shared test fixtures for the fleet workspace.
//!
//! Dev-dependency only, never published.
//!
//! - [`git`]: upstream repositories with commits and tags, built with `git2`
//! - [`package`]: package directories with a manifest and provider files

pub mod git;
pub mod package;
