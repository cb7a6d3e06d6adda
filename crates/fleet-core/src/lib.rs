//! Update orchestration for fleet
//!
//! This crate ties the Layer 0 crates together into the update engine:
//!
//! - **Lock store**: per-entity versions, status and provenance, persisted
//!   next to the fleetfile
//! - **Data sources**: git checkouts, release archives, local and internal
//!   packages, MCU firmware trees
//! - **Providers**: built-in `operation`, `pip-app` and `system-packages`
//!   plus anything registered at runtime
//! - **Engine**: refresh, batch update, stale removal and trigger dispatch
//! - **Host**: adapter trait and lock file watcher for long-running hosts
//!
//! # Architecture
//!
//! ```text
//!                 fleet-cli / host
//!                        |
//!                   fleet-core
//!                        |
//!     +----------+-------+-------+-----------+
//!     |          |               |           |
//! fleet-fs   fleet-git      fleet-exec   fleet-meta
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fleet_core::{Engine, Selection, Settings, TracingSink};
//!
//! async fn example() -> fleet_core::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let mut engine = Engine::open(settings, None, Arc::new(TracingSink))?;
//!     let report = engine.update(&Selection::all(), false).await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod host;
pub mod lock;
pub mod names;
pub mod progress;
pub mod provider;
pub mod settings;
pub mod source;
pub mod template;
pub mod trigger;
pub mod updatable;

pub use engine::{Engine, EntityStatus, Reconciliation, RefreshReport, Selection, display_version, key_name};
pub use error::{Error, FetchError, Result};
pub use host::{HostAdapter, HostService, LockWatcher, SaveGate, UnitInfo};
pub use lock::{Entry, LockKey, LockStore, Provided, Status, Versioned};
pub use names::NiceNames;
pub use progress::{BatchReport, Breadcrumb, LineKind, ProgressLine, ProgressSink, TracingSink};
pub use provider::{Provider, ProviderContext, ProviderRegistry};
pub use settings::Settings;
pub use source::DataSource;
pub use template::{PlaceholderRenderer, Renderer};
pub use trigger::TriggerDispatcher;
pub use updatable::{Updatable, UpdateContext};
