//! Command implementations

mod refresh;
mod status;
mod update;

pub use refresh::run_refresh;
pub use status::run_status;
pub use update::run_update;

use fleet_core::Selection;

/// Selection for an optional name, limited to MCUs when asked.
fn selection(name: Option<String>, mcus_only: bool) -> Selection {
    Selection { name, mcus_only }
}
