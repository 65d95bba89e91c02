//! quotad - provider quota ingestion daemon
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use clap::Parser;
use std::process::ExitCode;

use quotad::cli::{self, Cli, Output};
use quotad::core::logging::{self, LogLevel, LogSettings};
use quotad::render::error::render_error;
use quotad::storage::ResolvedConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let output = Output::from_cli(&cli);

    let config = ResolvedConfig::resolve(&cli.overrides());

    // Initialize logging
    let settings = LogSettings::resolve(
        cli.log_level.as_deref().and_then(LogLevel::from_arg),
        cli.json_output,
        config.as_ref().ok().and_then(|c| c.log_level.as_deref()),
        &|key| std::env::var(key).ok(),
    );
    logging::init(&settings);

    let result = match config {
        Ok(config) => cli::dispatch(cli.command, config, output).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.error_code(), "{e}");
            eprintln!("{}", render_error(&e, output.format, output.no_color, output.pretty));
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
