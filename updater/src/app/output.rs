//! Human and JSON rendering of command results

use colored::Colorize;
use serde::Serialize;

use crate::deploy::backup::BackupManifest;
use crate::deploy::fsm::UpdateState;
use crate::deploy::git::short_revision;
use crate::deploy::health::HealthOutcome;
use crate::deploy::orchestrator::{RollbackOutcome, RollbackReport, UpdatePlan, UpdateReport};
use crate::errors::UpdateError;

/// Print `value` as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<(), UpdateError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn revision(rev: Option<&String>) -> String {
    rev.map(|r| short_revision(r).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn state_label(state: UpdateState) -> String {
    let label = state.to_string();
    match state {
        UpdateState::Succeeded => label.green().bold().to_string(),
        UpdateState::RolledBack => label.yellow().bold().to_string(),
        _ => label.red().bold().to_string(),
    }
}

pub fn print_report(report: &UpdateReport) {
    println!("{} {}", "Update".bold(), state_label(report.state));
    println!(
        "  revision  {} -> {}{}",
        revision(report.previous_revision.as_ref()),
        revision(report.new_revision.as_ref()),
        if report.degraded { " (fetch failed)".yellow().to_string() } else { String::new() }
    );
    if let Some(strategy) = report.strategy {
        println!("  strategy  {}", strategy);
    }
    if let Some(files) = &report.changed_files {
        println!("  changed   {} file(s)", files.len());
    }
    println!("  backup    {}", report.backup.as_deref().unwrap_or("none"));
    if let Some(health) = &report.health {
        println!("  health    {}", health_label(health));
    }
    if let Some(rollback) = &report.rollback {
        println!("  rollback  {}", rollback_label(rollback));
    }
    if !report.pruned.is_empty() {
        println!("  pruned    {}", report.pruned.join(", "));
    }
    let history: Vec<String> = report.history.iter().map(|s| s.to_string()).collect();
    println!("  states    {}", history.join(" -> ").dimmed());
    if let Some(error) = &report.error {
        println!("  {} {}", "error".red(), error);
    }
}

pub fn print_rollback(report: &RollbackReport) {
    println!("{} {}", "Rollback".bold(), rollback_label(&report.outcome));
    println!("  revision  {}", revision(report.outcome.revision.as_ref()));
    if let Some(health) = &report.outcome.health {
        println!("  health    {}", health_label(health));
    }
}

pub fn print_plan(plan: &UpdatePlan) {
    println!(
        "{} {} -> {}",
        "Plan".bold(),
        revision(plan.previous_revision.as_ref()),
        revision(plan.remote_revision.as_ref())
    );
    if plan.degraded {
        println!("  {}", "remote unreachable, an update would only restart".yellow());
    }
    println!("  strategy  {}", plan.strategy.to_string().bold());

    let Some(classification) = &plan.classification else {
        return;
    };
    if classification.unknown {
        println!("  changes   unknown");
    }
    for (category, paths) in &classification.by_category {
        println!("  {:?} ({})", category, category.strategy());
        for path in paths {
            println!("    {}", path.display());
        }
    }
    if !classification.unmatched.is_empty() {
        println!("  unmatched (rebuild)");
        for path in &classification.unmatched {
            println!("    {}", path.display());
        }
    }
}

pub fn print_backups(backups: &[BackupManifest]) {
    if backups.is_empty() {
        println!("No backups");
        return;
    }
    for backup in backups {
        println!(
            "{}  {}  {:>10} bytes  {}",
            backup.name.bold(),
            backup.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            backup.size_bytes,
            revision(backup.revision.as_ref())
        );
    }
}

pub fn print_health(health: &HealthOutcome) {
    println!("{} {}", "Health".bold(), health_label(health));
    if let Some(error) = &health.last_error {
        println!("  {} {}", "error".red(), error);
    }
}

fn health_label(health: &HealthOutcome) -> String {
    if health.healthy {
        format!("{} after {} attempt(s)", "healthy".green(), health.attempts)
    } else {
        format!("{} after {} attempt(s)", "unhealthy".red(), health.attempts)
    }
}

fn rollback_label(outcome: &RollbackOutcome) -> String {
    let backup = outcome.backup.as_deref().unwrap_or("no backup");
    if outcome.succeeded {
        format!("{} from {}", "restored".green(), backup)
    } else {
        format!(
            "{} ({})",
            "failed".red(),
            outcome.error.as_deref().unwrap_or("unknown error")
        )
    }
}
