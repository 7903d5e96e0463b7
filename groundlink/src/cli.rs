use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "groundlink",
    version,
    about = "Ground station link service (UDP, playback and HIL links)"
)]
pub struct Cli {
    /// Path to config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the link service in the foreground
    Run {
        /// Replay these telemetry logs as additional playback links
        #[arg(long, num_args = 1..)]
        playback: Vec<PathBuf>,
    },

    /// Validate the config file and list its links without opening them
    Check,

    /// Write a default config file (does not overwrite unless --force)
    InitConfig {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },

    /// Print the resolved config file path
    PrintConfigPath,
}
