//! Command dispatch

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::options::{Cli, Command};
use crate::app::output;
use crate::context::DeploymentContext;
use crate::deploy::backup::TarBackupStore;
use crate::deploy::compose::{ComposeFlavor, ComposeRuntime};
use crate::deploy::git::GitCli;
use crate::deploy::health::{wait_until_healthy, HttpHealthProbe};
use crate::deploy::orchestrator::Orchestrator;
use crate::deploy::retry::tokio_sleep;
use crate::errors::UpdateError;
use crate::filesys::file::File;
use crate::logs::{init_logging, LogOptions};
use crate::storage::layout::WorkDirLayout;
use crate::storage::settings::Settings;
use crate::utils::version_info;

/// Run the command selected on the command line and return the exit code
pub async fn run(cli: Cli) -> Result<i32, UpdateError> {
    let command = cli.command();
    if command == Command::Version {
        output::print_json(&version_info())?;
        return Ok(0);
    }

    let root = working_dir(&cli)?;
    let layout = WorkDirLayout::new(&root);

    let settings_file = match &cli.settings {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let mut settings = Settings::load(&settings_file).await?;
    cli.apply(&mut settings);
    settings.validate()?;

    // Held until exit so the file writer flushes.
    let _log_guard = init_logging(LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    })?;
    debug!("Settings: {:?}", settings);

    let orchestrator = build_orchestrator(layout, &settings).await?;
    dispatch(&cli, command, &orchestrator).await
}

async fn dispatch(cli: &Cli, command: Command, orchestrator: &Orchestrator) -> Result<i32, UpdateError> {
    match command {
        Command::Update => {
            let report = orchestrator.update().await;
            if cli.json {
                output::print_json(&report)?;
            } else {
                output::print_report(&report);
            }
            Ok(report.exit_code())
        }
        Command::Plan => {
            let plan = orchestrator.plan().await;
            if cli.json {
                output::print_json(&plan)?;
            } else {
                output::print_plan(&plan);
            }
            Ok(0)
        }
        Command::Rollback { backup } => {
            let report = orchestrator.rollback(backup.as_deref()).await?;
            if cli.json {
                output::print_json(&report)?;
            } else {
                output::print_rollback(&report);
            }
            Ok(report.exit_code())
        }
        Command::Backups => {
            let backups = orchestrator.backups().await?;
            if cli.json {
                output::print_json(&backups)?;
            } else {
                output::print_backups(&backups);
            }
            Ok(0)
        }
        Command::Prune => {
            let pruned = orchestrator.prune().await?;
            if cli.json {
                output::print_json(&pruned)?;
            } else if pruned.is_empty() {
                println!("Nothing to prune");
            } else {
                println!("Removed {}", pruned.join(", "));
            }
            Ok(0)
        }
        Command::Health => {
            let ctx = orchestrator.context();
            let probe = HttpHealthProbe::new(ctx.health_url.clone(), ctx.probe_timeout)?;
            let health = wait_until_healthy(&probe, &ctx.health_policy, &tokio_sleep(), ctx.smoke_check).await;
            if cli.json {
                output::print_json(&health)?;
            } else {
                output::print_health(&health);
            }
            Ok(if health.healthy { 0 } else { 1 })
        }
        Command::Version => {
            output::print_json(&version_info())?;
            Ok(0)
        }
    }
}

/// Absolute working directory; subprocesses and tar depend on it
fn working_dir(cli: &Cli) -> Result<PathBuf, UpdateError> {
    let dir = match &cli.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    dir.canonicalize().map_err(|e| {
        UpdateError::EnvironmentError(format!("working directory {}: {}", dir.display(), e))
    })
}

/// Wire the production seams
async fn build_orchestrator(layout: WorkDirLayout, settings: &Settings) -> Result<Orchestrator, UpdateError> {
    let root = layout.root().to_path_buf();

    let scm = GitCli::new(&root, &settings.remote, &settings.branch);
    let ctx = DeploymentContext::discover(layout.clone(), settings, &scm).await?;

    let compose_file = match layout.service_definition().await {
        Some(file) => file.path().to_path_buf(),
        None => root.join("docker-compose.yml"),
    };
    // An unusable runtime is reported by the preflight check of each command.
    let runtime = match ComposeRuntime::detect(&root, &compose_file).await {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("{}", e);
            ComposeRuntime::new(&root, &compose_file, ComposeFlavor::Plugin)
        }
    };
    info!("Using {:?} compose", runtime.flavor());

    let backups = TarBackupStore::new(
        &root,
        layout.backups_dir(),
        settings.backup_paths.clone(),
        settings.log_paths.clone(),
    );
    let probe = HttpHealthProbe::new(ctx.health_url.clone(), ctx.probe_timeout)?;

    Ok(Orchestrator::new(
        ctx,
        Arc::new(scm),
        Arc::new(runtime),
        Arc::new(backups),
        Arc::new(probe),
    ))
}
