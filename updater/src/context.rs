//! Deployment context
//!
//! Everything an update run would otherwise read from ambient state,
//! collected once and passed in explicitly.

use chrono::Duration as RetentionWindow;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::deploy::classify::RuleTable;
use crate::deploy::git::SourceControl;
use crate::deploy::retry::RetryPolicy;
use crate::errors::UpdateError;
use crate::storage::layout::WorkDirLayout;
use crate::storage::settings::Settings;

/// Reaction to a failed build, start or health check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Leave the service as it is and report failure
    Never,

    /// Restore the pre-update backup and previous revision
    #[default]
    OnFailure,
}

/// Inputs of one update run
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    /// Working directory layout
    pub layout: WorkDirLayout,

    /// Revision deployed before this run, `None` outside a git checkout
    pub previous_revision: Option<String>,

    /// Health endpoint
    pub health_url: Url,

    /// Per-probe timeout
    pub probe_timeout: Duration,

    /// Health polling policy
    pub health_policy: RetryPolicy,

    /// Query the styles endpoint after the health check
    pub smoke_check: bool,

    /// Backups older than this are deleted
    pub retention: RetentionWindow,

    pub rollback: RollbackPolicy,

    /// Abort when the backup cannot be written
    pub require_backup: bool,

    /// Classification rules
    pub rules: RuleTable,
}

impl DeploymentContext {
    /// Build a context from settings; `previous_revision` is left empty
    pub fn from_settings(layout: WorkDirLayout, settings: &Settings) -> Result<Self, UpdateError> {
        Ok(Self {
            layout,
            previous_revision: None,
            health_url: settings.health.url()?,
            probe_timeout: Duration::from_secs(settings.health.timeout_secs),
            health_policy: RetryPolicy {
                max_attempts: settings.health.attempts,
                interval: Duration::from_secs(settings.health.interval_secs),
            },
            smoke_check: settings.health.smoke_check,
            retention: RetentionWindow::days(i64::from(settings.retention_days)),
            rollback: settings.rollback,
            require_backup: settings.require_backup,
            rules: RuleTable::with_extra(&settings.extra_rules)?,
        })
    }

    /// Build a context and record the revision currently checked out
    pub async fn discover(
        layout: WorkDirLayout,
        settings: &Settings,
        scm: &dyn SourceControl,
    ) -> Result<Self, UpdateError> {
        let mut ctx = Self::from_settings(layout, settings)?;
        ctx.previous_revision = match scm.head_revision().await {
            Ok(revision) => Some(revision),
            Err(e) => {
                tracing::warn!("No previous revision recorded: {}", e);
                None
            }
        };
        Ok(ctx)
    }

    pub fn with_previous_revision(mut self, revision: Option<&str>) -> Self {
        self.previous_revision = revision.map(str::to_string);
        self
    }
}
