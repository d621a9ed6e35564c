//! Orchestrator tests against in-memory seams

use std::sync::atomic::Ordering;

use chrono::Duration;

use updater::context::RollbackPolicy;
use updater::deploy::classify::UpdateStrategy;
use updater::deploy::fsm::UpdateState;
use updater::errors::UpdateError;
use updater::lock::UpdateLock;

use crate::common::{manifest, FakeProbe, Harness, PREVIOUS, REMOTE};

#[tokio::test]
async fn test_readme_only_skips_stop_and_rebuild() {
    let harness = Harness::new(&["README.md"]).await;
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Succeeded);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.strategy, Some(UpdateStrategy::NoOp));
    assert!(report.history.contains(&UpdateState::SkipRebuild));
    assert!(!report.history.contains(&UpdateState::Stopped));
    assert!(!journal.contains("stop"));
    assert!(!journal.contains("rebuild"));
    assert!(journal.contains("start"));
    assert_eq!(report.new_revision.as_deref(), Some(REMOTE));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_dockerfile_triggers_full_rebuild() {
    let harness = Harness::new(&["Dockerfile"]).await;
    let (orchestrator, dir, journal, _, probe) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Succeeded);
    assert_eq!(report.strategy, Some(UpdateStrategy::Rebuild));
    assert_eq!(
        report.history,
        vec![
            UpdateState::Idle,
            UpdateState::BackingUp,
            UpdateState::Fetching,
            UpdateState::Classifying,
            UpdateState::Stopped,
            UpdateState::Rebuilding,
            UpdateState::Starting,
            UpdateState::HealthChecking,
            UpdateState::Succeeded,
        ]
    );
    assert_eq!(report.health.as_ref().map(|h| h.attempts), Some(1));
    assert_eq!(probe.probes.load(Ordering::SeqCst), 1);
    assert!(journal.contains(&format!("fast_forward:{}", REMOTE)));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_config_change_restarts_without_rebuild() {
    let harness = Harness::new(&["nginx/postgen.conf", "README.md"]).await;
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Succeeded);
    assert_eq!(report.strategy, Some(UpdateStrategy::RestartOnly));
    assert!(journal.contains("stop"));
    assert!(!journal.contains("rebuild"));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_backup_is_taken_before_any_stop_or_rebuild() {
    let harness = Harness::new(&["backend/main.py"]).await;
    let (orchestrator, dir, journal, backups, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Succeeded);
    let backup = journal.position("backup").unwrap();
    assert!(backup < journal.position("stop").unwrap());
    assert!(backup < journal.position("rebuild").unwrap());
    assert_eq!(report.backup, Some("backup_20260320_120000".to_string()));
    assert_eq!(backups.names(), vec!["backup_20260320_120000"]);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_build_failure_rolls_back() {
    let harness = Harness::new(&["requirements.txt"]).await;
    harness.runtime.build_failures.store(1, Ordering::SeqCst);
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::RolledBack);
    assert_ne!(report.exit_code(), 0);
    assert!(report.error.as_deref().unwrap().contains("pip install"));
    assert!(report.history.contains(&UpdateState::RollingBack));

    let rollback = report.rollback.unwrap();
    assert!(rollback.succeeded);
    assert!(rollback.rebuilt);
    assert_eq!(rollback.backup.as_deref(), Some("backup_20260320_120000"));
    assert_eq!(rollback.revision.as_deref(), Some(PREVIOUS));

    let checkout = journal.position(&format!("checkout:{}", PREVIOUS)).unwrap();
    let restore = journal.position("restore:backup_20260320_120000").unwrap();
    assert!(checkout < restore);
    assert_eq!(journal.entries().iter().filter(|e| *e == "rebuild").count(), 2);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_build_failure_without_rollback_fails() {
    let mut harness = Harness::new(&["Dockerfile"]).await;
    harness.settings.rollback = RollbackPolicy::Never;
    harness.runtime.build_failures.store(1, Ordering::SeqCst);
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Failed);
    assert_eq!(report.exit_code(), 1);
    assert!(report.rollback.is_none());
    assert!(!report.history.contains(&UpdateState::RollingBack));
    assert!(!journal.entries().iter().any(|e| e.starts_with("restore:")));
    assert!(!journal.contains("start"));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_health_check_never_succeeds() {
    for policy in [RollbackPolicy::Never, RollbackPolicy::OnFailure] {
        let mut harness = Harness::new(&["frontend/app.js"]).await;
        harness.settings.rollback = policy;
        harness.probe = std::sync::Arc::new(FakeProbe::never_healthy());
        let (orchestrator, dir, _, _, probe) = harness.orchestrator();

        let report = orchestrator.update().await;

        assert_ne!(report.state, UpdateState::Succeeded);
        assert!(matches!(report.state, UpdateState::Failed | UpdateState::RolledBack));
        assert_eq!(report.health.as_ref().map(|h| h.attempts), Some(3));
        let expected_probes = if policy == RollbackPolicy::Never { 3 } else { 6 };
        assert_eq!(probe.probes.load(Ordering::SeqCst), expected_probes);

        dir.delete().await.unwrap();
    }
}

#[tokio::test]
async fn test_health_failure_recovers_after_rollback() {
    let mut harness = Harness::new(&["Dockerfile"]).await;
    harness.probe = std::sync::Arc::new(FakeProbe::scripted(&[false, false, false], true));
    let (orchestrator, dir, _, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::RolledBack);
    let rollback = report.rollback.unwrap();
    assert!(rollback.succeeded);
    assert!(rollback.health.unwrap().healthy);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_start_failure_in_rollback_fails_run() {
    let harness = Harness::new(&["Dockerfile"]).await;
    harness.runtime.start_failures.store(2, Ordering::SeqCst);
    let (orchestrator, dir, _, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Failed);
    let error = report.error.unwrap();
    assert!(error.contains("port 8082"));
    assert!(error.contains("Rollback error"));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_missing_service_definition_aborts_before_mutation() {
    let harness = Harness::new(&["Dockerfile"]).await;
    harness.dir.file("docker-compose.yml").delete().await.unwrap();
    let (orchestrator, dir, journal, backups, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Failed);
    assert_eq!(report.history, vec![UpdateState::Idle, UpdateState::Failed]);
    assert!(report.error.unwrap().contains("no service definition"));
    assert!(journal.entries().is_empty());
    assert!(backups.names().is_empty());

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_runtime_aborts_before_mutation() {
    let mut harness = Harness::new(&["Dockerfile"]).await;
    harness.runtime.available = false;
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.history, vec![UpdateState::Idle, UpdateState::Failed]);
    assert!(journal.entries().is_empty());
    assert!(!dir.subdir("backups").exists().await);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_stop_failure_fails_without_rollback() {
    let mut harness = Harness::new(&["Dockerfile"]).await;
    harness.runtime.fail_stop = true;
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Failed);
    assert_eq!(report.exit_code(), 1);
    assert!(report.rollback.is_none());
    assert!(!report.history.contains(&UpdateState::RollingBack));
    assert!(report.error.unwrap().contains("compose down"));
    assert!(journal.contains("stop"));
    assert!(!journal.contains("rebuild"));
    assert!(!journal.contains("start"));
    assert!(!journal.entries().iter().any(|e| e.starts_with("restore:")));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let harness = Harness::new(&["Dockerfile"]).await;
    let lock_path = harness.layout().lock_file().path().to_path_buf();
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let held = UpdateLock::acquire(&lock_path).unwrap();
    let report = orchestrator.update().await;
    assert_eq!(report.state, UpdateState::Failed);
    assert!(report.error.unwrap().contains("in progress"));
    assert!(journal.entries().is_empty());

    drop(held);
    assert_eq!(orchestrator.update().await.state, UpdateState::Succeeded);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_fetch_failure_degrades_to_restart() {
    let mut harness = Harness::new(&["Dockerfile"]).await;
    harness.scm.remote = Err("could not resolve host".to_string());
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Succeeded);
    assert!(report.degraded);
    assert_eq!(report.strategy, Some(UpdateStrategy::RestartOnly));
    assert_eq!(report.new_revision.as_deref(), Some(PREVIOUS));
    assert!(journal.contains("stop"));
    assert!(!journal.contains("rebuild"));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_unknown_previous_revision_rebuilds() {
    let mut harness = Harness::new(&["README.md"]).await;
    harness.previous = None;
    let (orchestrator, dir, _, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.strategy, Some(UpdateStrategy::Rebuild));
    assert!(report.changed_files.is_none());

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_already_up_to_date_is_noop() {
    let mut harness = Harness::new(&["Dockerfile"]).await;
    harness.scm.remote = Ok(PREVIOUS.to_string());
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Succeeded);
    assert_eq!(report.strategy, Some(UpdateStrategy::NoOp));
    assert_eq!(report.changed_files, Some(vec![]));
    assert!(!journal.contains("stop"));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_backup_failure_is_not_fatal() {
    let mut harness = Harness::new(&["Dockerfile"]).await;
    harness.backups = std::sync::Arc::new(updater_backups_failing(&harness));
    let (orchestrator, dir, _, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Succeeded);
    assert!(report.backup.is_none());

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_required_backup_failure_aborts_before_stop() {
    let mut harness = Harness::new(&["Dockerfile"]).await;
    harness.settings.require_backup = true;
    harness.backups = std::sync::Arc::new(updater_backups_failing(&harness));
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(
        report.history,
        vec![UpdateState::Idle, UpdateState::BackingUp, UpdateState::Failed]
    );
    assert!(!journal.contains("stop"));
    assert!(!journal.contains("fetch"));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_failure_without_backup_cannot_roll_back() {
    let mut harness = Harness::new(&["Dockerfile"]).await;
    harness.backups = std::sync::Arc::new(updater_backups_failing(&harness));
    harness.runtime.build_failures.store(1, Ordering::SeqCst);
    let (orchestrator, dir, _, _, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.state, UpdateState::Failed);
    assert!(report.error.unwrap().contains("no backup available"));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_retention_runs_after_update_and_keeps_newest() {
    let harness = Harness::new(&["README.md"]).await;
    let now = harness.now;
    {
        let mut seeded = harness.backups.backups.lock().unwrap();
        seeded.push(manifest("backup_old", PREVIOUS, now - Duration::days(30)));
        seeded.push(manifest("backup_recent", PREVIOUS, now - Duration::days(2)));
    }
    let (orchestrator, dir, _, backups, _) = harness.orchestrator();

    let report = orchestrator.update().await;

    assert_eq!(report.pruned, vec!["backup_old"]);
    assert_eq!(backups.names(), vec!["backup_recent", "backup_20260320_120000"]);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_prune_never_removes_the_only_backup() {
    let harness = Harness::new(&[]).await;
    let now = harness.now;
    harness
        .backups
        .backups
        .lock()
        .unwrap()
        .push(manifest("backup_ancient", PREVIOUS, now - Duration::days(90)));
    let (orchestrator, dir, _, backups, _) = harness.orchestrator();

    assert!(orchestrator.prune().await.unwrap().is_empty());
    assert_eq!(backups.names(), vec!["backup_ancient"]);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_manual_rollback_restores_latest_backup() {
    let harness = Harness::new(&[]).await;
    let now = harness.now;
    {
        let mut seeded = harness.backups.backups.lock().unwrap();
        seeded.push(manifest("backup_a", "aaaa", now - Duration::days(3)));
        seeded.push(manifest("backup_b", "bbbb", now - Duration::days(1)));
    }
    let (orchestrator, dir, journal, _, _) = harness.orchestrator();

    let report = orchestrator.rollback(None).await.unwrap();
    assert!(report.outcome.succeeded);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.outcome.backup.as_deref(), Some("backup_b"));
    assert_eq!(
        journal.entries(),
        vec!["checkout:bbbb", "restore:backup_b", "stop", "rebuild", "start"]
    );

    let named = orchestrator.rollback(Some("backup_a")).await.unwrap();
    assert_eq!(named.outcome.revision.as_deref(), Some("aaaa"));

    assert!(matches!(
        orchestrator.rollback(Some("backup_missing")).await,
        Err(UpdateError::NotFound(_))
    ));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_manual_rollback_without_backups() {
    let harness = Harness::new(&[]).await;
    let (orchestrator, dir, _, _, _) = harness.orchestrator();

    assert!(matches!(orchestrator.rollback(None).await, Err(UpdateError::NotFound(_))));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_plan_does_not_touch_the_service() {
    let harness = Harness::new(&["backend/main.py", "docs/setup.md"]).await;
    let (orchestrator, dir, journal, backups, _) = harness.orchestrator();

    let plan = orchestrator.plan().await;

    assert_eq!(plan.strategy, UpdateStrategy::Rebuild);
    assert_eq!(plan.remote_revision.as_deref(), Some(REMOTE));
    assert_eq!(journal.entries(), vec!["fetch"]);
    assert!(backups.names().is_empty());

    dir.delete().await.unwrap();
}

fn updater_backups_failing(harness: &Harness) -> crate::common::FakeBackups {
    crate::common::FakeBackups {
        journal: harness.journal.clone(),
        backups: std::sync::Mutex::new(Vec::new()),
        fail_create: true,
    }
}
