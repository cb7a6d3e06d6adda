//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// fleet - Keep printer add-ons, MCU firmware and fleet itself up to date
#[derive(Parser, Debug)]
#[command(name = "fleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "FLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Fleetfile to use instead of the one in the config root
    #[arg(long, global = true)]
    pub fleetfile: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Show versions and state of every declared entity
    Status,

    /// Look for new versions without changing anything
    ///
    /// Examples:
    ///   fleet refresh                 # Everything
    ///   fleet refresh "Klipper Macros" # One package by name or id
    ///   fleet refresh --mcus-only     # Firmware only
    Refresh {
        /// Package display name, id or MCU name
        name: Option<String>,

        /// Only refresh MCU firmware
        #[arg(long)]
        mcus_only: bool,
    },

    /// Install, update and remove entities to match the fleetfile
    Update {
        /// Package display name, id or MCU name
        name: Option<String>,

        /// Only remove what the fleetfile no longer declares
        #[arg(long)]
        remove_only: bool,
    },

    /// Remove what the fleetfile no longer declares
    Remove {
        /// Package display name or id
        name: Option<String>,
    },
}
