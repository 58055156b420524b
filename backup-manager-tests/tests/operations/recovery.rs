//! Tests for the disaster-recovery run

use pg_backup_manager::error::OperationError;
use std::sync::Arc;
use test_utils::{
    assert_progress_invariant, FaultyStorage, MockProcessRunner, OperationKind, ProgressChannel,
    RecordingObserver, TestContext, COMPLETE, FAILED,
};

#[tokio::test]
async fn test_recovery_restores_into_isolated_database() {
    let ctx = TestContext::with_minimal_config();
    let runner = MockProcessRunner::with_dump_size(300);
    let manager = ctx.manager(runner.clone());
    let channel = ProgressChannel::new();
    let observer = RecordingObserver::attach(&channel);

    let artifact = manager.backup(None).await.unwrap();
    let reporter = channel.reporter(OperationKind::DisasterRecovery);
    let operation = reporter.id();
    let isolated = manager
        .disaster_recovery(artifact.id.as_str(), Some(reporter))
        .await
        .unwrap();
    observer.wait_for_terminals(1).await;

    assert!(isolated.starts_with("appdb_recovery_"));
    assert_ne!(isolated, "appdb");

    let created = runner.calls_to("createdb");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].spec.args.last(), Some(&isolated));

    let restored = runner.calls_to("pg_restore");
    assert_eq!(restored.len(), 1);
    assert!(restored[0].spec.args.contains(&format!("--dbname={}", isolated)));
    assert!(!restored[0].spec.args.contains(&"--dbname=appdb".to_string()));

    let percentages = observer.percentages_for(operation);
    assert_eq!(&percentages[..2], &[0, 10]);
    assert_eq!(*percentages.last().unwrap(), COMPLETE);
    assert_progress_invariant(&percentages);
    assert!(ctx.temp_files().is_empty());

    // Escalated on success, isolated database never dropped
    let audit = manager.recent_audit(Some(1)).await.unwrap();
    assert!(audit[0].escalate);
    assert!(audit[0].message.contains(&isolated));
    assert!(runner.calls_to("dropdb").is_empty());
}

#[tokio::test]
async fn test_recovery_stops_when_createdb_fails() {
    let ctx = TestContext::with_minimal_config();
    let runner = MockProcessRunner::with_dump_size(300).fail("createdb", 1, "permission denied to create database");
    let manager = ctx.manager(runner.clone());

    let artifact = manager.backup(None).await.unwrap();
    let err = manager.disaster_recovery(artifact.id.as_str(), None).await.unwrap_err();

    assert!(err.to_string().contains("permission denied"));
    assert_eq!(runner.call_count("pg_restore"), 0);
    assert!(ctx.temp_files().is_empty());

    let audit = manager.recent_audit(Some(1)).await.unwrap();
    assert!(audit[0].escalate);
}

#[tokio::test]
async fn test_recovery_of_missing_artifact() {
    let ctx = TestContext::with_minimal_config();
    let runner = MockProcessRunner::new();
    let manager = ctx.manager(runner.clone());

    let err = manager
        .disaster_recovery("backup-19990101-000000.dump", None)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(runner.call_count("pg_restore"), 0);
    assert!(ctx.temp_files().is_empty());
}

#[tokio::test]
async fn test_recovery_download_stays_within_its_phase() {
    let ctx = TestContext::with_minimal_config();
    let runner = MockProcessRunner::with_dump_size(200_000);
    let manager = ctx.manager(runner.clone());
    let channel = ProgressChannel::new();
    let observer = RecordingObserver::attach(&channel);

    let artifact = manager.backup(None).await.unwrap();
    let reporter = channel.reporter(OperationKind::DisasterRecovery);
    let operation = reporter.id();
    manager.disaster_recovery(artifact.id.as_str(), Some(reporter)).await.unwrap();
    observer.wait_for_terminals(1).await;

    // createdb ends at 10, download covers [10, 80]
    let percentages = observer.percentages_for(operation);
    let (terminal, body) = percentages.split_last().unwrap();
    assert_eq!(*terminal, COMPLETE);
    assert_eq!(&body[..2], &[0, 10]);
    assert!(body[1..].iter().all(|p| (10..=80).contains(p)), "{:?}", percentages);
    assert_eq!(body.last(), Some(&80));
    assert_progress_invariant(&percentages);
}

#[tokio::test]
async fn test_recovery_interrupted_download_fails_cleanly() {
    let ctx = TestContext::with_minimal_config();
    let runner = MockProcessRunner::with_dump_size(200_000);
    ctx.manager(runner.clone()).backup(None).await.unwrap();
    let id = ctx.stored_objects().remove(0);

    let storage = Arc::new(FaultyStorage::new(ctx.local_storage()).fail_get_after(2));
    let manager = ctx.manager_with_storage(runner.clone(), storage.clone());
    let channel = ProgressChannel::new();
    let observer = RecordingObserver::attach(&channel);

    let reporter = channel.reporter(OperationKind::DisasterRecovery);
    let operation = reporter.id();
    let err = manager.disaster_recovery(&id, Some(reporter)).await.unwrap_err();
    observer.wait_for_terminals(1).await;

    assert!(matches!(err, OperationError::Storage(_)), "{:?}", err);
    assert_eq!(runner.call_count("createdb"), 1);
    assert_eq!(runner.call_count("pg_restore"), 0);

    let percentages = observer.percentages_for(operation);
    let (terminal, body) = percentages.split_last().unwrap();
    assert_eq!(*terminal, FAILED);
    assert!(body[1..].iter().all(|p| (10..80).contains(p)), "{:?}", percentages);
    assert_eq!(percentages.iter().filter(|p| **p == FAILED || **p == COMPLETE).count(), 1);
    assert_progress_invariant(&percentages);

    let audit = manager.recent_audit(Some(1)).await.unwrap();
    assert!(audit[0].escalate);
    assert!(audit[0].message.contains("connection reset"));
    assert!(ctx.temp_files().is_empty(), "Leftover temp files: {:?}", ctx.temp_files());
}
