//! Working directory layout

use std::path::{Path, PathBuf};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Service definition file names, in lookup order
pub const SERVICE_DEFINITION_FILES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Settings file name looked up in the working directory
pub const SETTINGS_FILE_NAME: &str = "postgen-update.json";

/// Layout of the deployed service's working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDirLayout {
    /// Root of the checkout
    pub root: PathBuf,
}

impl WorkDirLayout {
    /// Create a new layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the service definition file, if one is present
    pub async fn service_definition(&self) -> Option<File> {
        for name in SERVICE_DEFINITION_FILES {
            let file = File::new(self.root.join(name));
            if file.exists().await {
                return Some(file);
            }
        }
        None
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.root.join(SETTINGS_FILE_NAME))
    }

    /// Get the backups directory
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.root.join("backups"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.root.join("logs"))
    }

    /// Get the run lock file
    pub fn lock_file(&self) -> File {
        File::new(self.root.join("backups").join(".update.lock"))
    }
}

impl Default for WorkDirLayout {
    fn default() -> Self {
        Self::new(".")
    }
}
