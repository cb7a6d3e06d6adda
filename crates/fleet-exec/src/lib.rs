//! Subprocess execution for fleet providers and data sources
//!
//! [`CommandRunner`] drains stdout and stderr concurrently into one ordered
//! line sink and enforces an optional timeout. [`Privileged`] wraps the
//! elevated helper used for paths outside the user's writable area, and
//! [`python`] covers virtualenv and pip.

pub mod command;
pub mod error;
pub mod privileged;
pub mod python;

pub use command::{Cmd, CommandRunner, Output, Stream};
pub use error::{Error, Result};
pub use privileged::{Privileged, ServiceAction};
