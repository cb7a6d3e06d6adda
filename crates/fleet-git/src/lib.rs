//! Git operations for fleet data sources
//!
//! Everything goes through `git2`; nothing shells out to the `git` CLI.
//! Calls are blocking and meant to run on a blocking thread.

pub mod backlog;
pub mod checkout;
pub mod describe;
pub mod error;
pub mod remote;

pub use backlog::{CommitInfo, MAX_COMMITS};
pub use checkout::Checkout;
pub use error::{Error, Result};
pub use remote::{latest_tag, remote_version};
