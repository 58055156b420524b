//! Tests for overlapping operations on the same database

use pg_backup_manager::error::OperationError;
use std::time::Duration;
use test_utils::{sample_artifact_ids, ArtifactId, ConfigBuilder, MockProcessRunner, TestContext};

fn slow_runner() -> MockProcessRunner {
    MockProcessRunner::with_dump_size(100).with_delay(Duration::from_millis(200))
}

#[tokio::test]
async fn test_operations_on_one_database_are_serialized() {
    let ctx = TestContext::with_minimal_config();
    let runner = slow_runner();
    let manager = ctx.manager(runner.clone());
    let ids = sample_artifact_ids(2);

    let (first, second) = tokio::join!(
        manager.backup_as(ArtifactId::parse(&ids[0]).unwrap(), None),
        manager.backup_as(ArtifactId::parse(&ids[1]).unwrap(), None)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(runner.call_count("pg_dump"), 2);
    assert_eq!(runner.max_concurrent(), 1);
}

#[tokio::test]
async fn test_restore_waits_for_running_backup() {
    let ctx = TestContext::with_minimal_config();
    let runner = slow_runner();
    let manager = ctx.manager(runner.clone());
    let ids = sample_artifact_ids(2);
    manager.backup_as(ArtifactId::parse(&ids[0]).unwrap(), None).await.unwrap();

    let (backup, restore) = tokio::join!(
        manager.backup_as(ArtifactId::parse(&ids[1]).unwrap(), None),
        manager.restore(&ids[0], None)
    );
    backup.unwrap();
    restore.unwrap();

    assert_eq!(runner.max_concurrent(), 1);
}

#[tokio::test]
async fn test_without_serialization_runs_overlap() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().without_serialization());
    let runner = slow_runner();
    let manager = ctx.manager(runner.clone());
    let ids = sample_artifact_ids(2);

    let (first, second) = tokio::join!(
        manager.backup_as(ArtifactId::parse(&ids[0]).unwrap(), None),
        manager.backup_as(ArtifactId::parse(&ids[1]).unwrap(), None)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(runner.max_concurrent(), 2);
    // Distinct temp names, nothing left behind
    assert!(ctx.temp_files().is_empty());
}

#[tokio::test]
async fn test_separate_managers_share_the_database_lock() {
    // Two managers with their own lock tables, like the daemon and a CLI run
    let ctx = TestContext::with_minimal_config();
    let runner = slow_runner();
    let daemon = ctx.manager(runner.clone());
    let cli = ctx.manager(runner.clone());
    let ids = sample_artifact_ids(2);
    daemon.backup_as(ArtifactId::parse(&ids[0]).unwrap(), None).await.unwrap();

    let (backup, restore) = tokio::join!(
        daemon.backup_as(ArtifactId::parse(&ids[1]).unwrap(), None),
        cli.restore(&ids[0], None)
    );
    backup.unwrap();
    restore.unwrap();

    assert_eq!(runner.call_count("pg_restore"), 1);
    assert_eq!(runner.max_concurrent(), 1);
}

#[tokio::test]
async fn test_lock_directory_is_what_links_processes() {
    let shared = tempfile::TempDir::new().unwrap();
    let first = TestContext::from_builder(ConfigBuilder::minimal().with_lock_directory(shared.path()));
    let second = TestContext::from_builder(ConfigBuilder::minimal().with_lock_directory(shared.path()));
    let runner = slow_runner();
    let ids = sample_artifact_ids(2);

    let first_manager = first.manager(runner.clone());
    let second_manager = second.manager(runner.clone());
    let (a, b) = tokio::join!(
        first_manager.backup_as(ArtifactId::parse(&ids[0]).unwrap(), None),
        second_manager.backup_as(ArtifactId::parse(&ids[1]).unwrap(), None)
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(runner.max_concurrent(), 1);
    assert!(shared.path().join("localhost_5432_appdb.lock").exists());
}

#[tokio::test]
async fn test_same_second_backups_from_two_managers_never_mix() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().without_serialization());
    let runner = MockProcessRunner::with_dump_size(64 * 1024).with_delay(Duration::from_millis(100));
    let first = ctx.manager(runner.clone());
    let second = ctx.manager(runner.clone());
    let id = ArtifactId::parse(&sample_artifact_ids(1)[0]).unwrap();

    let (a, b) = tokio::join!(first.backup_as(id.clone(), None), second.backup_as(id.clone(), None));

    assert_eq!(runner.call_count("pg_dump"), 2);
    assert!(a.is_ok() != b.is_ok(), "exactly one backup may win");
    let err = a.err().or(b.err()).unwrap();
    assert!(matches!(err, OperationError::ArtifactConflict(_)), "{:?}", err);

    assert_eq!(ctx.stored_objects(), vec![id.to_string()]);
    let listed = first.list_artifacts().await.unwrap();
    assert_eq!(listed[0].size, 64 * 1024);
    assert!(ctx.temp_files().is_empty());
}
