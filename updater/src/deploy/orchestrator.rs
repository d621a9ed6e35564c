//! Update orchestrator
//!
//! Drives one update run through the [`UpdateFsm`]: backup, fetch, classify,
//! stop, rebuild, start, health check and, when configured, rollback. Every
//! side effect goes through one of the seams in [`crate::deploy`], so the
//! whole procedure runs against in-memory fakes in tests.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::context::{DeploymentContext, RollbackPolicy};
use crate::deploy::backup::{self, BackupManifest, BackupStore};
use crate::deploy::classify::{ChangeSet, Classification, UpdateStrategy};
use crate::deploy::compose::ContainerRuntime;
use crate::deploy::fsm::{UpdateEvent, UpdateFsm, UpdateState};
use crate::deploy::git::{short_revision, SourceControl};
use crate::deploy::health::{wait_until_healthy, HealthOutcome, HealthProbe};
use crate::deploy::retry::{tokio_sleep, SleepFn};
use crate::errors::UpdateError;
use crate::lock::UpdateLock;

/// Clock used for backup names and retention
pub type ClockFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Outcome of restoring a backup
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    /// Backup restored, if one was available
    pub backup: Option<String>,

    /// Revision checked out
    pub revision: Option<String>,

    pub rebuilt: bool,
    pub health: Option<HealthOutcome>,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl RollbackOutcome {
    fn new(backup: Option<&BackupManifest>, revision: Option<String>, rebuilt: bool) -> Self {
        Self {
            backup: backup.map(|b| b.name.clone()),
            revision,
            rebuilt,
            health: None,
            succeeded: false,
            error: None,
        }
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.succeeded = false;
        self.error = Some(error.into());
        self
    }
}

/// Summary of one `update()` run
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Terminal state
    pub state: UpdateState,

    /// Every state visited, in order
    pub history: Vec<UpdateState>,

    pub strategy: Option<UpdateStrategy>,
    pub previous_revision: Option<String>,
    pub new_revision: Option<String>,

    /// The fetch failed and the run fell back to a restart
    pub degraded: bool,

    /// Paths changed between the two revisions, `None` when unknown
    pub changed_files: Option<Vec<PathBuf>>,

    /// Backup taken before the run
    pub backup: Option<String>,

    pub health: Option<HealthOutcome>,
    pub rollback: Option<RollbackOutcome>,

    /// Backups removed by retention
    pub pruned: Vec<String>,

    pub error: Option<String>,
}

impl UpdateReport {
    pub fn succeeded(&self) -> bool {
        self.state == UpdateState::Succeeded
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        match self.state {
            UpdateState::Succeeded => 0,
            UpdateState::RolledBack => 2,
            _ => 1,
        }
    }
}

/// Summary of a manual rollback
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RollbackOutcome,
}

impl RollbackReport {
    pub fn exit_code(&self) -> i32 {
        if self.outcome.succeeded {
            0
        } else {
            1
        }
    }
}

/// What an update would do, computed without touching the service
#[derive(Debug, Clone, Serialize)]
pub struct UpdatePlan {
    pub previous_revision: Option<String>,
    pub remote_revision: Option<String>,

    /// The remote could not be reached
    pub degraded: bool,

    pub strategy: UpdateStrategy,
    pub classification: Option<Classification>,
}

/// Mutable state of a run in progress
struct Run {
    fsm: UpdateFsm,
    report: UpdateReport,
}

impl Run {
    fn new(run_id: Uuid, now: DateTime<Utc>, previous_revision: Option<String>) -> Self {
        Self {
            fsm: UpdateFsm::new(),
            report: UpdateReport {
                run_id,
                started_at: now,
                finished_at: now,
                state: UpdateState::Idle,
                history: Vec::new(),
                strategy: None,
                previous_revision,
                new_revision: None,
                degraded: false,
                changed_files: None,
                backup: None,
                health: None,
                rollback: None,
                pruned: Vec::new(),
                error: None,
            },
        }
    }

    fn advance(&mut self, event: UpdateEvent) -> Result<UpdateState, UpdateError> {
        let state = self.fsm.process(event)?;
        info!("-> {}", state);
        Ok(state)
    }

    /// Move to FAILED unless the run already ended
    fn abort(&mut self, e: &UpdateError) {
        if e.is_environment() {
            error!("Update aborted before any change: {}", e);
        } else {
            error!("Update failed: {}", e);
        }
        if self.fsm.is_terminal() {
            return;
        }
        if let Err(state_error) = self.fsm.process(UpdateEvent::Fail(e.to_string())) {
            error!("Could not record failure: {}", state_error);
            self.report.error = Some(e.to_string());
        }
    }

    fn finish(mut self, now: DateTime<Utc>) -> UpdateReport {
        self.report.finished_at = now;
        self.report.state = self.fsm.state();
        self.report.history = self.fsm.history().to_vec();
        if let Some(error) = self.fsm.error() {
            self.report.error = Some(error.to_string());
        }
        self.report
    }
}

/// Update orchestrator
pub struct Orchestrator {
    ctx: DeploymentContext,
    scm: Arc<dyn SourceControl>,
    runtime: Arc<dyn ContainerRuntime>,
    backups: Arc<dyn BackupStore>,
    probe: Arc<dyn HealthProbe>,
    sleep_fn: SleepFn,
    clock: ClockFn,
}

impl Orchestrator {
    pub fn new(
        ctx: DeploymentContext,
        scm: Arc<dyn SourceControl>,
        runtime: Arc<dyn ContainerRuntime>,
        backups: Arc<dyn BackupStore>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            ctx,
            scm,
            runtime,
            backups,
            probe,
            sleep_fn: tokio_sleep(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_sleep(mut self, sleep_fn: SleepFn) -> Self {
        self.sleep_fn = sleep_fn;
        self
    }

    pub fn with_clock(mut self, clock: ClockFn) -> Self {
        self.clock = clock;
        self
    }

    pub fn context(&self) -> &DeploymentContext {
        &self.ctx
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Bring the service to the latest remote revision
    pub async fn update(&self) -> UpdateReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("update", run_id = %run_id);
        self.run_update(run_id).instrument(span).await
    }

    async fn run_update(&self, run_id: Uuid) -> UpdateReport {
        let mut run = Run::new(run_id, self.now(), self.ctx.previous_revision.clone());
        info!(
            "Starting update in {} (rollback: {:?})",
            self.ctx.layout.root().display(),
            self.ctx.rollback
        );

        // Nothing is touched, backups included, until preflight passes.
        let lock = match self.preflight().await {
            Ok(lock) => lock,
            Err(e) => {
                run.abort(&e);
                return run.finish(self.now());
            }
        };

        if let Err(e) = self.execute(&mut run).await {
            run.abort(&e);
        }

        run.report.pruned = self.prune_quietly().await;
        drop(lock);

        let report = run.finish(self.now());
        match report.state {
            UpdateState::Succeeded => info!("Update succeeded"),
            UpdateState::RolledBack => warn!("Update rolled back: {}", report.error.as_deref().unwrap_or("")),
            state => error!("Update ended in {}", state),
        }
        report
    }

    /// Environment checks and the run lock
    async fn preflight(&self) -> Result<UpdateLock, UpdateError> {
        let layout = &self.ctx.layout;
        let definition = layout.service_definition().await.ok_or_else(|| {
            UpdateError::EnvironmentError(format!(
                "no service definition (docker-compose.yml, compose.yml) in {}",
                layout.root().display()
            ))
        })?;
        info!("Service definition: {}", definition.path().display());

        // Nothing may touch the disk before the runtime answers.
        self.runtime.ensure_available().await?;
        UpdateLock::acquire(layout.lock_file().path())
    }

    async fn execute(&self, run: &mut Run) -> Result<(), UpdateError> {
        let previous = self.ctx.previous_revision.clone();

        // 1. backup
        run.advance(UpdateEvent::Begin)?;
        let backup = self.take_backup(previous.as_deref()).await?;
        run.report.backup = backup.as_ref().map(|b| b.name.clone());

        // 2. fetch
        run.advance(UpdateEvent::BackupFinished)?;
        let (new_revision, degraded) = match self.fetch().await {
            Ok(revision) => (Some(revision), false),
            Err(e) => {
                warn!("Fetch failed, continuing with the current checkout: {}", e);
                (previous.clone(), true)
            }
        };
        run.report.new_revision = new_revision.clone();
        run.report.degraded = degraded;

        // 3. classify
        run.advance(UpdateEvent::FetchFinished)?;
        let strategy = if degraded {
            UpdateStrategy::RestartOnly
        } else {
            let change_set = self.change_set(previous.as_deref(), new_revision.as_deref()).await;
            run.report.changed_files = change_set.paths().map(|p| p.iter().cloned().collect());
            let classification = self.ctx.rules.classify(&change_set);
            if !classification.unmatched.is_empty() {
                info!("{} path(s) matched no rule", classification.unmatched.len());
            }
            classification.strategy
        };
        run.report.strategy = Some(strategy);
        info!("Update strategy: {}", strategy);

        // 4. stop, 5. apply
        let mut rebuilt = false;
        if strategy == UpdateStrategy::NoOp {
            run.advance(UpdateEvent::RebuildSkipped)?;
        } else {
            self.runtime.stop().await?;
            run.advance(UpdateEvent::ServiceStopped)?;

            if strategy == UpdateStrategy::Rebuild {
                run.advance(UpdateEvent::RebuildStarted)?;
                rebuilt = true;
                if let Err(e) = self.runtime.rebuild().await {
                    return self.recover(run, backup.as_ref(), rebuilt, e).await;
                }
            } else {
                run.advance(UpdateEvent::RebuildSkipped)?;
            }
        }

        // 6. start
        run.advance(UpdateEvent::StartRequested)?;
        if let Err(e) = self.runtime.start().await {
            return self.recover(run, backup.as_ref(), rebuilt, e).await;
        }

        // 7. health check
        run.advance(UpdateEvent::ServiceStarted)?;
        let health = self.wait_healthy().await;
        run.report.health = Some(health.clone());
        if !health.healthy {
            let e = UpdateError::HealthCheckError(format!(
                "service unhealthy after {} attempts: {}",
                health.attempts,
                health.last_error.as_deref().unwrap_or("no response")
            ));
            return self.recover(run, backup.as_ref(), rebuilt, e).await;
        }

        run.advance(UpdateEvent::HealthPassed)?;
        Ok(())
    }

    /// Handle a build, start or health failure according to the rollback policy
    async fn recover(
        &self,
        run: &mut Run,
        backup: Option<&BackupManifest>,
        rebuilt: bool,
        cause: UpdateError,
    ) -> Result<(), UpdateError> {
        error!("{}", cause);
        if self.ctx.rollback == RollbackPolicy::Never {
            run.advance(UpdateEvent::Fail(cause.to_string()))?;
            return Ok(());
        }

        run.advance(UpdateEvent::RollbackStarted(cause.to_string()))?;
        let revision = self
            .ctx
            .previous_revision
            .clone()
            .or_else(|| backup.and_then(|b| b.revision.clone()));
        let outcome = self.roll_back(backup, revision, rebuilt).await;
        let succeeded = outcome.succeeded;
        let error = outcome.error.clone();
        run.report.rollback = Some(outcome);

        if succeeded {
            run.advance(UpdateEvent::RollbackFinished)?;
        } else {
            let e = UpdateError::RollbackError(error.unwrap_or_else(|| "unknown failure".to_string()));
            run.advance(UpdateEvent::Fail(e.to_string()))?;
        }
        Ok(())
    }

    /// Restore `backup`, check out `revision` and bring the service back up
    async fn roll_back(
        &self,
        backup: Option<&BackupManifest>,
        revision: Option<String>,
        rebuild: bool,
    ) -> RollbackOutcome {
        let outcome = RollbackOutcome::new(backup, revision.clone(), rebuild);
        let Some(backup) = backup else {
            return outcome.failed("no backup available");
        };
        warn!("Rolling back to backup {}", backup.name);

        if let Some(revision) = revision.as_deref() {
            info!("Resetting checkout to {}", short_revision(revision));
            if let Err(e) = self.scm.checkout(revision).await {
                return outcome.failed(e.to_string());
            }
        }

        if let Err(e) = self.backups.restore(backup).await {
            return outcome.failed(e.to_string());
        }

        if let Err(e) = self.runtime.stop().await {
            warn!("Stop before rollback restart failed: {}", e);
        }

        if rebuild {
            if let Err(e) = self.runtime.rebuild().await {
                return outcome.failed(e.to_string());
            }
        }

        if let Err(e) = self.runtime.start().await {
            return outcome.failed(e.to_string());
        }

        let health = self.wait_healthy().await;
        let mut outcome = RollbackOutcome {
            health: Some(health.clone()),
            ..outcome
        };
        if !health.healthy {
            return outcome.failed(format!(
                "service unhealthy after rollback: {}",
                health.last_error.as_deref().unwrap_or("no response")
            ));
        }

        info!("Rollback to {} complete", backup.name);
        outcome.succeeded = true;
        outcome
    }

    async fn take_backup(&self, revision: Option<&str>) -> Result<Option<BackupManifest>, UpdateError> {
        let result = self.backups.create(revision, self.now()).await.and_then(|manifest| {
            if manifest.size_bytes == 0 {
                return Err(UpdateError::BackupError(format!("{} is empty", manifest.archive)));
            }
            Ok(manifest)
        });

        match result {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) if self.ctx.require_backup => Err(e),
            Err(e) => {
                warn!("Backup failed, continuing without one: {}", e);
                Ok(None)
            }
        }
    }

    async fn fetch(&self) -> Result<String, UpdateError> {
        let revision = self.scm.fetch().await?;
        self.scm.fast_forward(&revision).await?;
        info!("Checked out {}", short_revision(&revision));
        Ok(revision)
    }

    async fn change_set(&self, previous: Option<&str>, new: Option<&str>) -> ChangeSet {
        match (previous, new) {
            (Some(previous), Some(new)) if previous == new => ChangeSet::empty(),
            (Some(previous), Some(new)) => match self.scm.changed_files(previous, new).await {
                Ok(paths) => ChangeSet::Known(paths),
                Err(e) => {
                    warn!("Could not compute changes: {}", e);
                    ChangeSet::Unknown
                }
            },
            _ => ChangeSet::Unknown,
        }
    }

    async fn wait_healthy(&self) -> HealthOutcome {
        wait_until_healthy(
            self.probe.as_ref(),
            &self.ctx.health_policy,
            &self.sleep_fn,
            self.ctx.smoke_check,
        )
        .await
    }

    async fn prune_quietly(&self) -> Vec<String> {
        match self.prune().await {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!("Backup retention failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Delete backups older than the retention window
    pub async fn prune(&self) -> Result<Vec<String>, UpdateError> {
        backup::prune(self.backups.as_ref(), self.now(), self.ctx.retention).await
    }

    /// All backups, oldest first
    pub async fn backups(&self) -> Result<Vec<BackupManifest>, UpdateError> {
        self.backups.list().await
    }

    /// Restore the named backup, or the latest one, and its revision
    pub async fn rollback(&self, name: Option<&str>) -> Result<RollbackReport, UpdateError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("rollback", run_id = %run_id);
        self.run_rollback(run_id, name).instrument(span).await
    }

    async fn run_rollback(&self, run_id: Uuid, name: Option<&str>) -> Result<RollbackReport, UpdateError> {
        let started_at = self.now();
        let _lock = self.preflight().await?;

        let backup = match name {
            Some(name) => self.backups.find(name).await?,
            None => self
                .backups
                .latest()
                .await?
                .ok_or_else(|| UpdateError::NotFound("no backups to roll back to".to_string()))?,
        };

        let outcome = self.roll_back(Some(&backup), backup.revision.clone(), true).await;
        if let Some(e) = &outcome.error {
            error!("Rollback failed: {}", e);
        }

        Ok(RollbackReport {
            run_id,
            started_at,
            finished_at: self.now(),
            outcome,
        })
    }

    /// Compute what `update()` would do without touching the service
    pub async fn plan(&self) -> UpdatePlan {
        let previous = self.ctx.previous_revision.clone();
        let remote = match self.scm.fetch().await {
            Ok(revision) => Some(revision),
            Err(e) => {
                warn!("Fetch failed: {}", e);
                None
            }
        };

        if remote.is_none() {
            return UpdatePlan {
                previous_revision: previous,
                remote_revision: None,
                degraded: true,
                strategy: UpdateStrategy::RestartOnly,
                classification: None,
            };
        }

        let change_set = self.change_set(previous.as_deref(), remote.as_deref()).await;
        let classification = self.ctx.rules.classify(&change_set);
        UpdatePlan {
            previous_revision: previous,
            remote_revision: remote,
            degraded: false,
            strategy: classification.strategy,
            classification: Some(classification),
        }
    }
}
