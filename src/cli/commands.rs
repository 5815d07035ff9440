//! CLI command implementations

use std::path::Path;

use crate::cancel::cancellation;
use crate::config::ExchangeConfig;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::observability::Logger;
use crate::server::ResultServer;

use super::args::{Cli, Command};

/// Parse arguments and run the selected command
pub fn run() -> ExchangeResult<()> {
    run_command(Cli::parse_args().command)
}

pub fn run_command(command: Command) -> ExchangeResult<()> {
    match command {
        Command::Serve { config, listen } => serve(&config, listen),
        Command::CheckConfig { config } => check_config(&config).map(|rendered| {
            println!("{}", rendered);
        }),
    }
}

/// Load the config and run the result service until Ctrl-C
pub fn serve(config_path: &Path, listen: Option<String>) -> ExchangeResult<()> {
    let mut config = ExchangeConfig::load(config_path)?;
    if let Some(listen) = listen {
        config.listen_address = listen;
    }
    Logger::set_min_severity(config.log_severity()?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ExchangeError::service_start_failed("could not start async runtime", e))?;

    runtime.block_on(async move {
        let server = ResultServer::bind(config).await?;
        let (handle, token) = cancellation();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel();
            }
        });

        server.serve(token).await
    })
}

/// Validate the config and render it with defaults applied
pub fn check_config(config_path: &Path) -> ExchangeResult<String> {
    let config = ExchangeConfig::load(config_path)?;
    serde_json::to_string_pretty(&config)
        .map_err(|e| ExchangeError::config_invalid(format!("could not render config: {}", e)))
}
