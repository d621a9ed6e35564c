//! Command line options

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::context::RollbackPolicy;
use crate::logs::LogLevel;
use crate::storage::settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "postgen-update")]
#[command(version, about = "Update the postgen service to the latest revision")]
pub struct Cli {
    /// Service working directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Settings file (defaults to postgen-update.json in the working directory)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Print the result as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Report failure instead of rolling back
    #[arg(long, global = true)]
    pub no_rollback: bool,

    /// Override the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Back up, fetch, rebuild if needed, restart and health-check (default)
    Update,
    /// Show what an update would do without touching the service
    Plan,
    /// Restore a backup and the revision it was taken at
    Rollback {
        /// Backup name (defaults to the most recent one)
        #[arg(long)]
        backup: Option<String>,
    },
    /// List backups
    Backups,
    /// Delete backups older than the retention window
    Prune,
    /// Poll the health endpoint
    Health,
    /// Print version information
    Version,
}

impl Cli {
    /// Subcommand to run; no subcommand means `update`
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Update)
    }

    /// Apply command line overrides on top of file settings
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
        if self.no_rollback {
            settings.rollback = RollbackPolicy::Never;
        }
    }
}
