//! Package manifest and dependency declaration schema for fleet.
//!
//! Everything here is declarative: the types describe what a package
//! provides and what the host declares, and carry no behaviour beyond
//! decoding, predicate evaluation and canonical re-encoding for hashing.

pub mod data_source;
pub mod error;
pub mod fleetfile;
pub mod identifier;
pub mod manifest;
pub mod options;
pub mod path_ref;
pub mod src_dst;
pub mod trigger;

pub use data_source::DataSourceSpec;
pub use error::{Error, Result};
pub use fleetfile::{Changed, Changes, Dependency, Fleetfile, McuMode, McuSpec};
pub use identifier::Identifier;
pub use manifest::{MANIFEST_FILE_NAMES, Manifest, PackageType, ProvidesBlock, find_manifest};
pub use options::{Options, Predicate};
pub use path_ref::PathRef;
pub use src_dst::SrcDst;
pub use trigger::{ManifestTrigger, ManifestTriggers, Phase, Trigger};
