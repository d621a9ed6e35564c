//! Finite State Machine for a single update run

use serde::{Deserialize, Serialize};

use crate::errors::UpdateError;

/// Update run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// Nothing done yet
    Idle,

    /// Writing the backup artifact
    BackingUp,

    /// Fetching the remote revision
    Fetching,

    /// Diffing and classifying the change set
    Classifying,

    /// Service stopped
    Stopped,

    /// Rebuilding the image without cache
    Rebuilding,

    /// Reusing the existing image
    SkipRebuild,

    /// Starting the service
    Starting,

    /// Polling the health endpoint
    HealthChecking,

    /// Service is up at the new revision
    Succeeded,

    /// Restoring the previous revision
    RollingBack,

    /// Service is up at the previous revision
    RolledBack,

    /// Run ended without a healthy service
    Failed,
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateState::Succeeded | UpdateState::RolledBack | UpdateState::Failed
        )
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UpdateState::Idle => "IDLE",
            UpdateState::BackingUp => "BACKING_UP",
            UpdateState::Fetching => "FETCHING",
            UpdateState::Classifying => "CLASSIFYING",
            UpdateState::Stopped => "STOPPED",
            UpdateState::Rebuilding => "REBUILDING",
            UpdateState::SkipRebuild => "SKIP_REBUILD",
            UpdateState::Starting => "STARTING",
            UpdateState::HealthChecking => "HEALTH_CHECKING",
            UpdateState::Succeeded => "SUCCEEDED",
            UpdateState::RollingBack => "ROLLING_BACK",
            UpdateState::RolledBack => "ROLLED_BACK",
            UpdateState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Update event
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// Preconditions passed, run begins
    Begin,

    /// Backup step finished (with or without an artifact)
    BackupFinished,

    /// Fetch step finished (possibly degraded)
    FetchFinished,

    /// Running service was stopped
    ServiceStopped,

    /// Rebuild started
    RebuildStarted,

    /// Rebuild not needed
    RebuildSkipped,

    /// Image is ready, start requested
    StartRequested,

    /// Service start command succeeded
    ServiceStarted,

    /// Health endpoint answered
    HealthPassed,

    /// A step failed and the previous revision is being restored
    RollbackStarted(String),

    /// Previous revision is up again
    RollbackFinished,

    /// Run failed
    Fail(String),
}

/// Update FSM.
///
/// Every state is entered at most once per run.
#[derive(Debug, Clone)]
pub struct UpdateFsm {
    state: UpdateState,
    history: Vec<UpdateState>,
    error: Option<String>,
}

impl UpdateFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: UpdateState::Idle,
            history: vec![UpdateState::Idle],
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// States visited so far, in order, including the current one
    pub fn history(&self) -> &[UpdateState] {
        &self.history
    }

    /// Get the failure or rollback reason, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: UpdateEvent) -> Result<UpdateState, UpdateError> {
        use UpdateEvent as E;
        use UpdateState as S;

        let new_state = match (self.state, &event) {
            (S::Idle, E::Begin) => S::BackingUp,
            (S::BackingUp, E::BackupFinished) => S::Fetching,
            (S::Fetching, E::FetchFinished) => S::Classifying,

            (S::Classifying, E::ServiceStopped) => S::Stopped,
            // No-op updates leave the service running
            (S::Classifying, E::RebuildSkipped) => S::SkipRebuild,

            (S::Stopped, E::RebuildStarted) => S::Rebuilding,
            (S::Stopped, E::RebuildSkipped) => S::SkipRebuild,

            (S::Rebuilding | S::SkipRebuild, E::StartRequested) => S::Starting,
            (S::Starting, E::ServiceStarted) => S::HealthChecking,
            (S::HealthChecking, E::HealthPassed) => S::Succeeded,

            (S::Rebuilding | S::Starting | S::HealthChecking, E::RollbackStarted(reason)) => {
                self.error = Some(reason.clone());
                S::RollingBack
            }
            (S::RollingBack, E::RollbackFinished) => S::RolledBack,

            (state, E::Fail(reason)) if !state.is_terminal() => {
                // keep the original cause when a rollback also fails
                let message = match (&self.error, state) {
                    (Some(cause), S::RollingBack) => format!("{}; {}", cause, reason),
                    _ => reason.clone(),
                };
                self.error = Some(message);
                S::Failed
            }

            (state, event) => {
                return Err(UpdateError::StateError(format!(
                    "{} -> {:?}",
                    state, event
                )));
            }
        };

        if self.history.contains(&new_state) {
            return Err(UpdateError::StateError(format!(
                "{} already visited",
                new_state
            )));
        }

        self.state = new_state;
        self.history.push(new_state);
        Ok(new_state)
    }
}

impl Default for UpdateFsm {
    fn default() -> Self {
        Self::new()
    }
}
