//! Settings file management

use serde::{Deserialize, Serialize};
use url::Url;

use crate::context::RollbackPolicy;
use crate::deploy::classify::ChangeCategory;
use crate::errors::UpdateError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Updater settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stderr
    #[serde(default)]
    pub log_json: bool,

    /// Git remote to fetch from
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch tracked by the deployment
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Health check configuration
    #[serde(default)]
    pub health: HealthSettings,

    /// Backups older than this many days are deleted after each run
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// What to do when a build, start or health check fails
    #[serde(default)]
    pub rollback: RollbackPolicy,

    /// Abort instead of continuing when the backup cannot be written
    #[serde(default)]
    pub require_backup: bool,

    /// Configuration paths captured in every backup and restored on rollback
    #[serde(default = "default_backup_paths")]
    pub backup_paths: Vec<String>,

    /// Log paths captured in every backup, never restored
    #[serde(default = "default_log_paths")]
    pub log_paths: Vec<String>,

    /// Classification rules checked before the built-in table
    #[serde(default)]
    pub extra_rules: Vec<RuleSettings>,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_retention_days() -> u32 {
    7
}

fn default_backup_paths() -> Vec<String> {
    [
        ".env",
        "docker-compose.yml",
        "docker-compose.yaml",
        "compose.yml",
        "compose.yaml",
        "nginx",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_log_paths() -> Vec<String> {
    vec!["logs".to_string()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            remote: default_remote(),
            branch: default_branch(),
            health: HealthSettings::default(),
            retention_days: default_retention_days(),
            rollback: RollbackPolicy::default(),
            require_backup: false,
            backup_paths: default_backup_paths(),
            log_paths: default_log_paths(),
            extra_rules: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from `file`, falling back to defaults when it is absent
    pub async fn load(file: &File) -> Result<Self, UpdateError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json().await.map_err(|e| {
            UpdateError::ConfigError(format!(
                "Failed to read settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), UpdateError> {
        self.health.url()?;
        if self.health.attempts == 0 {
            return Err(UpdateError::ConfigError(
                "health.attempts must be at least 1".to_string(),
            ));
        }
        if self.retention_days == 0 {
            return Err(UpdateError::ConfigError(
                "retention_days must be at least 1".to_string(),
            ));
        }
        if self.branch.trim().is_empty() || self.remote.trim().is_empty() {
            return Err(UpdateError::ConfigError(
                "remote and branch must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Health endpoint URL
    #[serde(default = "default_health_url")]
    pub url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,

    /// Number of probes before giving up
    #[serde(default = "default_health_attempts")]
    pub attempts: u32,

    /// Fixed delay between probes in seconds
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Query the styles endpoint once the service is up
    #[serde(default)]
    pub smoke_check: bool,
}

fn default_health_url() -> String {
    "http://127.0.0.1:8082/api/health".to_string()
}

fn default_health_timeout() -> u64 {
    5
}

fn default_health_attempts() -> u32 {
    10
}

fn default_health_interval() -> u64 {
    3
}

impl HealthSettings {
    /// Parsed health endpoint URL
    pub fn url(&self) -> Result<Url, UpdateError> {
        let url = Url::parse(&self.url).map_err(|e| {
            UpdateError::ConfigError(format!("Invalid health URL {}: {}", self.url, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(UpdateError::ConfigError(format!(
                "Unsupported health URL scheme: {}",
                other
            ))),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            url: default_health_url(),
            timeout_secs: default_health_timeout(),
            attempts: default_health_attempts(),
            interval_secs: default_health_interval(),
            smoke_check: false,
        }
    }
}

/// A user-supplied classification rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSettings {
    /// Glob pattern; without a `/` it is matched against the file name only
    pub pattern: String,

    /// Category assigned to matching paths
    pub category: ChangeCategory,
}
