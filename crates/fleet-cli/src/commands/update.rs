//! Update command implementation

use colored::Colorize;
use fleet_core::Engine;

use super::selection;
use crate::error::{CliError, Result};

/// Run one batch and print its summary. Entity failures are reported in
/// the progress output; they turn into a non-zero exit here.
pub async fn run_update(engine: &mut Engine, name: Option<String>, remove_only: bool) -> Result<()> {
    let report = engine.update(&selection(name, false), remove_only).await?;
    println!("{}", report.to_string().bold());
    match report.failed {
        0 => Ok(()),
        1 => Err(CliError::user("1 entity failed, see the messages above")),
        n => Err(CliError::user(format!("{n} entities failed, see the messages above"))),
    }
}
