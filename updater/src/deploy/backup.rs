//! Backup artifacts and retention

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::deploy::process;
use crate::errors::UpdateError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

const ARCHIVE_SUFFIX: &str = ".tar.gz";
const MANIFEST_SUFFIX: &str = ".json";

/// Metadata stored next to every backup archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// `backup_YYYYMMDD_HHMMSS`, possibly with a `_N` suffix
    pub name: String,

    /// Revision checked out when the backup was taken
    pub revision: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Archive file name inside the backups directory
    pub archive: String,

    pub size_bytes: u64,

    /// Hex SHA-256 of the archive
    pub sha256: String,

    /// Configuration paths in the archive, restored on rollback
    pub config_paths: Vec<String>,

    /// Log paths in the archive, kept for inspection only
    #[serde(default)]
    pub log_paths: Vec<String>,
}

/// Storage for backup artifacts
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Archive current configuration and logs
    async fn create(&self, revision: Option<&str>, now: DateTime<Utc>) -> Result<BackupManifest, UpdateError>;

    /// All backups, oldest first
    async fn list(&self) -> Result<Vec<BackupManifest>, UpdateError>;

    /// Put the backup's configuration files back into the working directory
    async fn restore(&self, backup: &BackupManifest) -> Result<(), UpdateError>;

    /// Delete a backup and its manifest
    async fn delete(&self, backup: &BackupManifest) -> Result<(), UpdateError>;

    /// Most recent backup
    async fn latest(&self) -> Result<Option<BackupManifest>, UpdateError> {
        Ok(self.list().await?.pop())
    }

    /// Backup by name
    async fn find(&self, name: &str) -> Result<BackupManifest, UpdateError> {
        self.list()
            .await?
            .into_iter()
            .find(|b| b.name == name)
            .ok_or_else(|| UpdateError::NotFound(format!("backup {}", name)))
    }
}

/// Base name of a backup taken at `now`
pub fn backup_name(now: DateTime<Utc>) -> String {
    format!("backup_{}", now.format("%Y%m%d_%H%M%S"))
}

/// Backups older than `window`, oldest first.
///
/// The most recent backup is never returned, however old it is. A window
/// reaching past the start of the calendar expires nothing.
pub fn expired(backups: &[BackupManifest], now: DateTime<Utc>, window: Duration) -> Vec<BackupManifest> {
    let Some(cutoff) = now.checked_sub_signed(window) else {
        return Vec::new();
    };
    let newest = backups.iter().max_by_key(|b| b.created_at).map(|b| b.name.as_str());

    let mut old: Vec<BackupManifest> = backups
        .iter()
        .filter(|b| Some(b.name.as_str()) != newest)
        .filter(|b| b.created_at < cutoff)
        .cloned()
        .collect();
    old.sort_by_key(|b| b.created_at);
    old
}

/// Delete expired backups and return their names
pub async fn prune(store: &dyn BackupStore, now: DateTime<Utc>, window: Duration) -> Result<Vec<String>, UpdateError> {
    let backups = store.list().await?;
    let mut deleted = Vec::new();

    for backup in expired(&backups, now, window) {
        match store.delete(&backup).await {
            Ok(()) => {
                debug!("Deleted expired backup {}", backup.name);
                deleted.push(backup.name);
            }
            Err(e) => warn!("Failed to delete backup {}: {}", backup.name, e),
        }
    }

    if !deleted.is_empty() {
        info!("Removed {} backup(s) older than {} days", deleted.len(), window.num_days());
    }
    Ok(deleted)
}

/// Hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Gzipped tarballs under `backups/`, created with the system `tar`.
///
/// Needs a GNU or BSD `tar` with gzip support on the `PATH`.
#[derive(Debug, Clone)]
pub struct TarBackupStore {
    working_dir: PathBuf,
    backups_dir: Dir,
    config_paths: Vec<String>,
    log_paths: Vec<String>,
}

impl TarBackupStore {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        backups_dir: Dir,
        config_paths: Vec<String>,
        log_paths: Vec<String>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            backups_dir,
            config_paths,
            log_paths,
        }
    }

    /// Configured paths that exist right now
    async fn present(&self, paths: &[String]) -> Vec<String> {
        let mut present = Vec::new();
        for path in paths {
            if tokio::fs::metadata(self.working_dir.join(path)).await.is_ok() {
                present.push(path.clone());
            }
        }
        present
    }

    /// First free name for a backup taken at `now`
    async fn free_name(&self, now: DateTime<Utc>) -> String {
        let base = backup_name(now);
        let mut name = base.clone();
        let mut n = 1;
        while self.archive_file(&name).exists().await || self.manifest_file(&name).exists().await {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        name
    }

    fn archive_file(&self, name: &str) -> File {
        self.backups_dir.file(&format!("{}{}", name, ARCHIVE_SUFFIX))
    }

    fn manifest_file(&self, name: &str) -> File {
        self.backups_dir.file(&format!("{}{}", name, MANIFEST_SUFFIX))
    }

    async fn tar(&self, args: &[&str]) -> Result<(), UpdateError> {
        let output = process::run("tar", args, &self.working_dir)
            .await
            .map_err(|e| UpdateError::BackupError(format!("Failed to run tar: {}", e)))?;
        if !output.success {
            return Err(UpdateError::BackupError(output.describe_failure("tar")));
        }
        Ok(())
    }
}

#[async_trait]
impl BackupStore for TarBackupStore {
    async fn create(&self, revision: Option<&str>, now: DateTime<Utc>) -> Result<BackupManifest, UpdateError> {
        let config_paths = self.present(&self.config_paths).await;
        let log_paths = self.present(&self.log_paths).await;
        if config_paths.is_empty() && log_paths.is_empty() {
            return Err(UpdateError::BackupError(
                "none of the configured backup paths exist".to_string(),
            ));
        }

        self.backups_dir
            .create()
            .await
            .map_err(|e| UpdateError::BackupError(format!("backups directory not writable: {}", e)))?;

        let name = self.free_name(now).await;
        let archive = self.archive_file(&name);
        let archive_path = archive.path().to_string_lossy().into_owned();
        let working_dir = self.working_dir.to_string_lossy().into_owned();

        let mut args = vec!["-czf", archive_path.as_str(), "-C", working_dir.as_str(), "--"];
        args.extend(config_paths.iter().map(String::as_str));
        args.extend(log_paths.iter().map(String::as_str));
        self.tar(&args).await?;

        let bytes = archive.read_bytes().await?;
        if bytes.is_empty() {
            archive.delete().await?;
            return Err(UpdateError::BackupError(format!("{} is empty", archive_path)));
        }

        let manifest = BackupManifest {
            name: name.clone(),
            revision: revision.map(str::to_string),
            created_at: now,
            archive: format!("{}{}", name, ARCHIVE_SUFFIX),
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
            config_paths,
            log_paths,
        };
        self.manifest_file(&name).write_json(&manifest).await?;

        info!("Backup written: {} ({} bytes)", manifest.archive, manifest.size_bytes);
        Ok(manifest)
    }

    async fn list(&self) -> Result<Vec<BackupManifest>, UpdateError> {
        let mut backups = Vec::new();
        for file in self.backups_dir.list_files_with_suffix(MANIFEST_SUFFIX).await? {
            match file.read_json::<BackupManifest>().await {
                Ok(manifest) => backups.push(manifest),
                Err(e) => warn!("Skipping unreadable manifest {}: {}", file.path().display(), e),
            }
        }
        backups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(backups)
    }

    async fn restore(&self, backup: &BackupManifest) -> Result<(), UpdateError> {
        let archive = self.backups_dir.file(&backup.archive);
        if !archive.exists().await {
            return Err(UpdateError::NotFound(format!("archive {}", backup.archive)));
        }

        let bytes = archive.read_bytes().await?;
        let digest = sha256_hex(&bytes);
        if digest != backup.sha256 {
            return Err(UpdateError::BackupError(format!(
                "checksum mismatch for {}: expected {}, found {}",
                backup.archive, backup.sha256, digest
            )));
        }

        if backup.config_paths.is_empty() {
            debug!("Backup {} holds no configuration to restore", backup.name);
            return Ok(());
        }

        let archive_path = archive.path().to_string_lossy().into_owned();
        let working_dir = self.working_dir.to_string_lossy().into_owned();
        let mut args = vec!["-xzf", archive_path.as_str(), "-C", working_dir.as_str(), "--"];
        args.extend(backup.config_paths.iter().map(String::as_str));
        self.tar(&args).await?;

        info!("Restored configuration from {}", backup.name);
        Ok(())
    }

    async fn delete(&self, backup: &BackupManifest) -> Result<(), UpdateError> {
        self.backups_dir.file(&backup.archive).delete().await?;
        self.manifest_file(&backup.name).delete().await?;
        Ok(())
    }
}
