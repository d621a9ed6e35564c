//! In-memory fakes for the orchestrator seams

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use updater::context::DeploymentContext;
use updater::deploy::backup::{BackupManifest, BackupStore};
use updater::deploy::compose::ContainerRuntime;
use updater::deploy::git::SourceControl;
use updater::deploy::health::HealthProbe;
use updater::deploy::orchestrator::Orchestrator;
use updater::deploy::retry::no_sleep;
use updater::errors::UpdateError;
use updater::filesys::dir::Dir;
use updater::storage::layout::WorkDirLayout;
use updater::storage::settings::Settings;

pub const PREVIOUS: &str = "1111111111111111111111111111111111111111";
pub const REMOTE: &str = "2222222222222222222222222222222222222222";

/// Side effects in the order they happened
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

pub struct FakeScm {
    pub journal: Journal,
    pub head: Option<String>,
    pub remote: Result<String, String>,
    pub changed: BTreeSet<PathBuf>,
}

#[async_trait]
impl SourceControl for FakeScm {
    async fn head_revision(&self) -> Result<String, UpdateError> {
        self.head
            .clone()
            .ok_or_else(|| UpdateError::SourceControlError("not a git repository".to_string()))
    }

    async fn fetch(&self) -> Result<String, UpdateError> {
        self.journal.push("fetch");
        self.remote.clone().map_err(UpdateError::NetworkError)
    }

    async fn fast_forward(&self, revision: &str) -> Result<(), UpdateError> {
        self.journal.push(format!("fast_forward:{}", revision));
        Ok(())
    }

    async fn changed_files(&self, _from: &str, _to: &str) -> Result<BTreeSet<PathBuf>, UpdateError> {
        Ok(self.changed.clone())
    }

    async fn checkout(&self, revision: &str) -> Result<(), UpdateError> {
        self.journal.push(format!("checkout:{}", revision));
        Ok(())
    }
}

pub struct FakeRuntime {
    pub journal: Journal,
    pub available: bool,
    /// Number of rebuilds that fail before one succeeds
    pub build_failures: AtomicU32,
    pub start_failures: AtomicU32,
    pub fail_stop: bool,
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_available(&self) -> Result<(), UpdateError> {
        if self.available {
            Ok(())
        } else {
            Err(UpdateError::EnvironmentError("docker daemon unreachable".to_string()))
        }
    }

    async fn stop(&self) -> Result<(), UpdateError> {
        self.journal.push("stop");
        if self.fail_stop {
            return Err(UpdateError::RuntimeError("docker compose down exited with 1".to_string()));
        }
        Ok(())
    }

    async fn rebuild(&self) -> Result<(), UpdateError> {
        self.journal.push("rebuild");
        if take_failure(&self.build_failures) {
            return Err(UpdateError::BuildError("pip install exited with 1".to_string()));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), UpdateError> {
        self.journal.push("start");
        if take_failure(&self.start_failures) {
            return Err(UpdateError::StartError("port 8082 already allocated".to_string()));
        }
        Ok(())
    }
}

pub struct FakeBackups {
    pub journal: Journal,
    pub backups: Mutex<Vec<BackupManifest>>,
    pub fail_create: bool,
}

impl FakeBackups {
    pub fn names(&self) -> Vec<String> {
        self.backups.lock().unwrap().iter().map(|b| b.name.clone()).collect()
    }
}

pub fn manifest(name: &str, revision: &str, created_at: DateTime<Utc>) -> BackupManifest {
    BackupManifest {
        name: name.to_string(),
        revision: Some(revision.to_string()),
        created_at,
        archive: format!("{}.tar.gz", name),
        size_bytes: 2048,
        sha256: "00".repeat(32),
        config_paths: vec![".env".to_string()],
        log_paths: vec!["logs".to_string()],
    }
}

#[async_trait]
impl BackupStore for FakeBackups {
    async fn create(&self, revision: Option<&str>, now: DateTime<Utc>) -> Result<BackupManifest, UpdateError> {
        self.journal.push("backup");
        if self.fail_create {
            return Err(UpdateError::BackupError("disk full".to_string()));
        }
        let backup = manifest(
            &updater::deploy::backup::backup_name(now),
            revision.unwrap_or("unknown"),
            now,
        );
        self.backups.lock().unwrap().push(backup.clone());
        Ok(backup)
    }

    async fn list(&self) -> Result<Vec<BackupManifest>, UpdateError> {
        let mut backups = self.backups.lock().unwrap().clone();
        backups.sort_by_key(|b| b.created_at);
        Ok(backups)
    }

    async fn restore(&self, backup: &BackupManifest) -> Result<(), UpdateError> {
        self.journal.push(format!("restore:{}", backup.name));
        Ok(())
    }

    async fn delete(&self, backup: &BackupManifest) -> Result<(), UpdateError> {
        self.backups.lock().unwrap().retain(|b| b.name != backup.name);
        Ok(())
    }
}

/// Answers from a script, then `fallback` forever
pub struct FakeProbe {
    pub answers: Mutex<VecDeque<bool>>,
    pub fallback: bool,
    pub probes: AtomicU32,
}

impl FakeProbe {
    pub fn healthy() -> Self {
        Self::scripted(&[], true)
    }

    pub fn never_healthy() -> Self {
        Self::scripted(&[], false)
    }

    pub fn scripted(answers: &[bool], fallback: bool) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            fallback,
            probes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self) -> Result<(), UpdateError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let healthy = self.answers.lock().unwrap().pop_front().unwrap_or(self.fallback);
        if healthy {
            Ok(())
        } else {
            Err(UpdateError::HealthCheckError("connection refused".to_string()))
        }
    }
}

/// A test deployment in a temporary working directory
pub struct Harness {
    pub dir: Dir,
    pub journal: Journal,
    pub settings: Settings,
    pub previous: Option<String>,
    pub scm: FakeScm,
    pub runtime: FakeRuntime,
    pub backups: Arc<FakeBackups>,
    pub probe: Arc<FakeProbe>,
    pub now: DateTime<Utc>,
}

impl Harness {
    /// Working directory with a compose file, changes `paths` on the remote
    pub async fn new(paths: &[&str]) -> Self {
        let dir = Dir::create_temp_dir("updater-it").await.unwrap();
        dir.file("docker-compose.yml")
            .write_string("services:\n  app:\n    build: .\n")
            .await
            .unwrap();

        let journal = Journal::default();
        let mut settings = Settings::default();
        settings.health.attempts = 3;

        Self {
            scm: FakeScm {
                journal: journal.clone(),
                head: Some(PREVIOUS.to_string()),
                remote: Ok(REMOTE.to_string()),
                changed: paths.iter().map(PathBuf::from).collect(),
            },
            runtime: FakeRuntime {
                journal: journal.clone(),
                available: true,
                build_failures: AtomicU32::new(0),
                start_failures: AtomicU32::new(0),
                fail_stop: false,
            },
            backups: Arc::new(FakeBackups {
                journal: journal.clone(),
                backups: Mutex::new(Vec::new()),
                fail_create: false,
            }),
            probe: Arc::new(FakeProbe::healthy()),
            previous: Some(PREVIOUS.to_string()),
            now: "2026-03-20T12:00:00Z".parse().unwrap(),
            dir,
            journal,
            settings,
        }
    }

    pub fn layout(&self) -> WorkDirLayout {
        WorkDirLayout::new(self.dir.path())
    }

    pub fn orchestrator(self) -> (Orchestrator, Dir, Journal, Arc<FakeBackups>, Arc<FakeProbe>) {
        let ctx = DeploymentContext::from_settings(self.layout(), &self.settings)
            .unwrap()
            .with_previous_revision(self.previous.as_deref());
        let now = self.now;

        let orchestrator = Orchestrator::new(
            ctx,
            Arc::new(self.scm),
            Arc::new(self.runtime),
            self.backups.clone(),
            self.probe.clone(),
        )
        .with_sleep(no_sleep())
        .with_clock(Arc::new(move || now));

        (orchestrator, self.dir, self.journal, self.backups, self.probe)
    }
}
