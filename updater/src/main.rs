//! Postgen Updater - Entry Point
//!
//! Moves the running postgen container to the latest remote revision, with a
//! backup taken first and an automatic rollback on failure.

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing::error;

use updater::app::options::Cli;
use updater::app::run::run;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
