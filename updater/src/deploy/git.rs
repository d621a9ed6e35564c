//! Git source control executor

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::deploy::process;
use crate::errors::UpdateError;

/// Source control operations needed by an update
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Revision currently checked out
    async fn head_revision(&self) -> Result<String, UpdateError>;

    /// Fetch the tracked branch and return its remote revision.
    /// Does not touch the working tree.
    async fn fetch(&self) -> Result<String, UpdateError>;

    /// Move the working tree forward to `revision`
    async fn fast_forward(&self, revision: &str) -> Result<(), UpdateError>;

    /// Paths changed between two revisions
    async fn changed_files(&self, from: &str, to: &str) -> Result<BTreeSet<PathBuf>, UpdateError>;

    /// Force the working tree back to `revision`
    async fn checkout(&self, revision: &str) -> Result<(), UpdateError>;
}

/// `git` CLI implementation
#[derive(Debug, Clone)]
pub struct GitCli {
    working_dir: PathBuf,
    remote: String,
    branch: String,
}

impl GitCli {
    pub fn new(working_dir: impl Into<PathBuf>, remote: &str, branch: &str) -> Self {
        Self {
            working_dir: working_dir.into(),
            remote: remote.to_string(),
            branch: branch.to_string(),
        }
    }

    fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    async fn git(&self, args: &[&str]) -> Result<String, UpdateError> {
        let output = process::run("git", args, &self.working_dir)
            .await
            .map_err(|e| UpdateError::SourceControlError(format!("Failed to run git: {}", e)))?;

        if !output.success {
            return Err(UpdateError::SourceControlError(
                output.describe_failure(&format!("git {}", args.join(" "))),
            ));
        }

        Ok(output.stdout.trim().to_string())
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn head_revision(&self) -> Result<String, UpdateError> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn fetch(&self) -> Result<String, UpdateError> {
        info!("Fetching {} from {}", self.branch, self.remote);

        // fetch failures degrade the run, they never abort it
        self.git(&["fetch", "--quiet", &self.remote, &self.branch])
            .await
            .map_err(|e| UpdateError::NetworkError(e.to_string()))?;

        self.git(&["rev-parse", &self.remote_ref()]).await
    }

    async fn fast_forward(&self, revision: &str) -> Result<(), UpdateError> {
        debug!("Fast-forwarding to {}", revision);
        self.git(&["merge", "--ff-only", "--quiet", revision]).await?;
        Ok(())
    }

    async fn changed_files(&self, from: &str, to: &str) -> Result<BTreeSet<PathBuf>, UpdateError> {
        let range = format!("{}..{}", from, to);
        let stdout = self.git(&["diff", "--name-only", &range]).await?;
        Ok(parse_name_only(&stdout))
    }

    async fn checkout(&self, revision: &str) -> Result<(), UpdateError> {
        info!("Resetting working tree to {}", revision);
        self.git(&["reset", "--hard", "--quiet", revision]).await?;
        Ok(())
    }
}

/// Parse `git diff --name-only` output
pub fn parse_name_only(stdout: &str) -> BTreeSet<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Abbreviated revision for logs and reports
pub fn short_revision(revision: &str) -> &str {
    revision.get(..8).unwrap_or(revision)
}
