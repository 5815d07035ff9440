//! CLI module for the exchange
//!
//! Provides command-line interface for:
//! - serve: Run the result service
//! - check-config: Validate a configuration file

mod args;
mod commands;

pub use args::{Cli, Command};
pub use commands::{check_config, run, run_command, serve};
