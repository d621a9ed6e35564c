//! Docker Compose executor

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::deploy::process;
use crate::errors::UpdateError;

/// Container runtime operations needed by an update
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fail with an environment error when the runtime cannot be reached
    async fn ensure_available(&self) -> Result<(), UpdateError>;

    /// Stop the running service
    async fn stop(&self) -> Result<(), UpdateError>;

    /// Discard cached build artifacts and rebuild the image without layer cache
    async fn rebuild(&self) -> Result<(), UpdateError>;

    /// Start the service in the background
    async fn start(&self) -> Result<(), UpdateError>;
}

/// Which compose CLI is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose`
    Plugin,
    /// `docker-compose`
    Standalone,
}

impl ComposeFlavor {
    fn program(&self) -> &'static str {
        match self {
            ComposeFlavor::Plugin => "docker",
            ComposeFlavor::Standalone => "docker-compose",
        }
    }
}

/// Docker Compose implementation
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    working_dir: PathBuf,
    compose_file: PathBuf,
    flavor: ComposeFlavor,
}

impl ComposeRuntime {
    pub fn new(working_dir: impl Into<PathBuf>, compose_file: impl Into<PathBuf>, flavor: ComposeFlavor) -> Self {
        Self {
            working_dir: working_dir.into(),
            compose_file: compose_file.into(),
            flavor,
        }
    }

    /// Pick `docker compose` if available, `docker-compose` otherwise
    pub async fn detect(working_dir: &Path, compose_file: &Path) -> Result<Self, UpdateError> {
        let plugin = process::run("docker", &["compose", "version"], working_dir).await;
        if matches!(&plugin, Ok(out) if out.success) {
            debug!("Using docker compose plugin");
            return Ok(Self::new(working_dir, compose_file, ComposeFlavor::Plugin));
        }

        debug!("docker compose unavailable, trying docker-compose...");
        let standalone = process::run("docker-compose", &["version"], working_dir).await;
        if matches!(&standalone, Ok(out) if out.success) {
            return Ok(Self::new(working_dir, compose_file, ComposeFlavor::Standalone));
        }

        Err(UpdateError::EnvironmentError(
            "Neither 'docker compose' nor 'docker-compose' is available".to_string(),
        ))
    }

    pub fn flavor(&self) -> ComposeFlavor {
        self.flavor
    }

    /// Full argument list for a compose subcommand
    pub fn compose_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 3);
        if self.flavor == ComposeFlavor::Plugin {
            full.push("compose");
        }
        full.push("-f");
        full.push(self.compose_file.to_str().unwrap_or("docker-compose.yml"));
        full.extend_from_slice(args);
        full
    }

    async fn compose(&self, args: &[&str]) -> Result<process::CommandOutput, UpdateError> {
        let full = self.compose_args(args);
        process::run(self.flavor.program(), &full, &self.working_dir)
            .await
            .map_err(|e| {
                UpdateError::RuntimeError(format!("Failed to run {}: {}", self.flavor.program(), e))
            })
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn ensure_available(&self) -> Result<(), UpdateError> {
        let output = process::run("docker", &["info", "--format", "{{.ServerVersion}}"], &self.working_dir)
            .await
            .map_err(|e| UpdateError::EnvironmentError(format!("Failed to run docker: {}", e)))?;

        if !output.success {
            return Err(UpdateError::EnvironmentError(
                output.describe_failure("docker info"),
            ));
        }

        debug!("Docker engine {}", output.stdout.trim());

        let compose = self.compose(&["version"]).await.map_err(|e| UpdateError::EnvironmentError(e.to_string()))?;
        if !compose.success {
            return Err(UpdateError::EnvironmentError(
                compose.describe_failure("compose version"),
            ));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), UpdateError> {
        info!("Stopping service");
        let output = self.compose(&["down", "--remove-orphans"]).await?;
        if !output.success {
            return Err(UpdateError::RuntimeError(output.describe_failure("compose down")));
        }
        Ok(())
    }

    async fn rebuild(&self) -> Result<(), UpdateError> {
        info!("Discarding build cache");
        match process::run("docker", &["builder", "prune", "--force"], &self.working_dir).await {
            Ok(out) if out.success => {}
            Ok(out) => warn!("{}", out.describe_failure("docker builder prune")),
            Err(e) => warn!("Failed to run docker builder prune: {}", e),
        }

        info!("Rebuilding image without cache");
        let output = self.compose(&["build", "--no-cache"]).await?;
        if !output.success {
            return Err(UpdateError::BuildError(output.describe_failure("compose build")));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), UpdateError> {
        info!("Starting service");
        let output = self.compose(&["up", "-d"]).await?;
        if !output.success {
            return Err(UpdateError::StartError(output.describe_failure("compose up")));
        }
        Ok(())
    }
}
