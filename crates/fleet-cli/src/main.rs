//! fleet CLI
//!
//! Keeps the packages, MCU firmware and fleet installation of a printer
//! host in line with its fleetfile.

mod cli;
mod commands;
mod console;
mod error;

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use fleet_core::{Engine, Settings};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cli::{Cli, Commands};
use console::ConsoleSink;
use error::Result;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

/// `RUST_LOG` decides what is logged unless `--verbose` asks for
/// everything.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::debug!("Verbose mode enabled");
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        println!("{} printer add-on manager", "fleet".green().bold());
        println!();
        println!("Run {} for available commands.", "fleet --help".cyan());
        return Ok(());
    };

    let settings = Settings::load(cli.config.as_deref())?;
    let mut engine = Engine::open(settings, cli.fleetfile.as_deref(), Arc::new(ConsoleSink))?;
    tracing::debug!(?engine, "engine ready");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(execute(command, &mut engine))
}

async fn execute(command: Commands, engine: &mut Engine) -> Result<()> {
    match command {
        Commands::Status => {
            commands::run_status(&engine.status());
            Ok(())
        }
        Commands::Refresh { name, mcus_only } => commands::run_refresh(engine, name, mcus_only).await,
        Commands::Update { name, remove_only } => commands::run_update(engine, name, remove_only).await,
        Commands::Remove { name } => commands::run_update(engine, name, true).await,
    }
}
