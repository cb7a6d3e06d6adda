//! Refresh command implementation

use colored::Colorize;
use fleet_core::Engine;

use super::selection;
use crate::error::Result;

pub async fn run_refresh(engine: &mut Engine, name: Option<String>, mcus_only: bool) -> Result<()> {
    let report = engine.refresh(&selection(name, mcus_only)).await?;
    println!("{}", report.to_string().bold());
    Ok(())
}
