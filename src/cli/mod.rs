//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

/// Message-driven adaptation engine for deployed cloud stacks.
#[derive(Debug, Parser)]
#[command(name = "adaptationengine", version, about)]
pub struct Cli {
    /// Full path to an alternate config file.
    #[arg(short = 'c', long = "cfg", value_name = "FILE")]
    pub cfg_file: Option<PathBuf>,

    /// Perform a message queue healthcheck and exit.
    #[arg(long)]
    pub healthcheck: bool,

    /// Delete journal entries from the database, then continue startup.
    #[arg(long = "clear-db-log")]
    pub clear_db_log: bool,

    /// Delete the config document stored in the database, then continue
    /// startup.
    #[arg(long = "clear-db-config")]
    pub clear_db_config: bool,
}
