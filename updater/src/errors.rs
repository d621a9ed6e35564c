//! Error types for the updater

use thiserror::Error;

/// Main error type for the updater
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Missing service definition, unreachable runtime, lock held.
    /// Raised before anything is mutated.
    #[error("Environment error: {0}")]
    EnvironmentError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Source control error: {0}")]
    SourceControlError(String),

    #[error("Backup error: {0}")]
    BackupError(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Start error: {0}")]
    StartError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Health check failed: {0}")]
    HealthCheckError(String),

    #[error("Rollback error: {0}")]
    RollbackError(String),

    #[error("Invalid state transition: {0}")]
    StateError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UpdateError {
    /// Whether this error aborts a run before any mutation
    pub fn is_environment(&self) -> bool {
        matches!(self, UpdateError::EnvironmentError(_))
    }
}

impl From<anyhow::Error> for UpdateError {
    fn from(err: anyhow::Error) -> Self {
        UpdateError::Internal(err.to_string())
    }
}
