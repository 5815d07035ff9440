//! CLI argument definitions using clap
//!
//! Commands:
//! - aerodb-exchange serve --config <path> [--listen <addr>]
//! - aerodb-exchange check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Intermediate-result exchange service
#[derive(Parser, Debug)]
#[command(name = "aerodb-exchange")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the result service until interrupted
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./exchange.json")]
        config: PathBuf,

        /// Listen address, overriding `listen_address` from the file
        #[arg(long)]
        listen: Option<String>,
    },

    /// Validate a configuration file and print it with defaults applied
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./exchange.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
