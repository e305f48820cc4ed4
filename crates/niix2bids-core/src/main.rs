//! `niix2bids` command-line entry point.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use niix2bids_core::cli::Cli;
use niix2bids_core::logging::init_logging;
use niix2bids_core::pipeline;

fn run(cli: &Cli) -> Result<()> {
    let config = cli.to_config().resolve().context("Invalid arguments")?;

    let log_file = config
        .logfile
        .then(|| config.log_file_path(chrono::Local::now()));
    init_logging(cli.verbose, log_file.as_deref()).context("Failed to initialize logging")?;
    if let Some(path) = &log_file {
        tracing::info!("logfile : {}", path.display());
    }

    pipeline::run(&config).context("Conversion failed")?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("niix2bids: {e:#}");
            ExitCode::FAILURE
        }
    }
}
