//! Single-run lock

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::errors::UpdateError;

/// Exclusive advisory lock held for the length of a run.
///
/// Released when dropped.
#[derive(Debug)]
pub struct UpdateLock {
    file: std::fs::File,
    path: PathBuf,
}

impl UpdateLock {
    /// Take the lock or fail immediately if another run holds it
    pub fn acquire(path: &Path) -> Result<Self, UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(UpdateError::EnvironmentError(format!(
                    "another update is in progress (lock held on {})",
                    path.display()
                )));
            }
            return Err(e.into());
        }

        debug!("Acquired update lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
