//! Tests for the backup run

use pg_backup_manager::error::OperationError;
use std::sync::Arc;
use test_utils::{
    assert_progress_invariant, ArtifactId, ConfigBuilder, FaultyStorage, MockProcessRunner,
    ProgressChannel, RecordingObserver, TestContext, COMPLETE, FAILED,
};

#[tokio::test]
async fn test_backup_progress_and_listing() {
    let ctx = TestContext::with_minimal_config();
    let manager = ctx.manager(MockProcessRunner::with_dump_size(1000));
    let channel = ProgressChannel::new();
    let observer = RecordingObserver::attach(&channel);

    let reporter = channel.reporter(test_utils::OperationKind::Backup);
    let operation = reporter.id();
    let artifact = manager.backup(Some(reporter)).await.unwrap();
    observer.wait_for_terminals(1).await;

    let percentages = observer.percentages_for(operation);
    assert_eq!(percentages[0], 0);
    assert_eq!(percentages[1], 10);
    assert_eq!(*percentages.last().unwrap(), COMPLETE);
    assert_progress_invariant(&percentages);

    let listed = manager.list_artifacts().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, artifact.id);
    assert_eq!(listed[0].size, 1000);
}

#[tokio::test]
async fn test_backup_passes_connection_parameters() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::minimal()
            .with_database("db.internal", 6543, "backup", "orders")
            .with_password("s3cret"),
    );
    let runner = MockProcessRunner::with_dump_size(10);
    let manager = ctx.manager(runner.clone());

    manager.backup(None).await.unwrap();

    let calls = runner.calls_to("pg_dump");
    assert_eq!(calls.len(), 1);
    let spec = &calls[0].spec;
    assert!(spec.args.contains(&"db.internal".to_string()));
    assert!(spec.args.contains(&"6543".to_string()));
    assert!(spec.args.contains(&"--format=custom".to_string()));
    assert_eq!(spec.args.last().map(String::as_str), Some("orders"));
    assert_eq!(spec.env.get("PGPASSWORD").map(String::as_str), Some("s3cret"));
    assert!(!spec.args.iter().any(|a| a.contains("s3cret")));
}

#[tokio::test]
async fn test_backup_uses_configured_prefix() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_artifact_prefix("nightly"));
    let manager = ctx.manager(MockProcessRunner::with_dump_size(10));

    let artifact = manager.backup(None).await.unwrap();
    assert!(artifact.id.as_str().starts_with("nightly-"));
    assert!(artifact.id.as_str().ends_with(".dump"));
    assert_eq!(ctx.stored_objects(), vec![artifact.id.to_string()]);
}

#[tokio::test]
async fn test_temp_directory_empty_after_success() {
    let ctx = TestContext::with_minimal_config();
    let manager = ctx.manager(MockProcessRunner::with_dump_size(2048));

    manager.backup(None).await.unwrap();
    assert!(ctx.temp_files().is_empty(), "Leftover temp files: {:?}", ctx.temp_files());
}

#[tokio::test]
async fn test_dump_failure() {
    let ctx = TestContext::with_minimal_config();
    let manager = ctx.manager(MockProcessRunner::new().fail("pg_dump", 1, "FATAL: role does not exist"));
    let channel = ProgressChannel::new();
    let observer = RecordingObserver::attach(&channel);

    let reporter = channel.reporter(test_utils::OperationKind::Backup);
    let operation = reporter.id();
    let err = manager.backup(Some(reporter)).await.unwrap_err();
    observer.wait_for_terminals(1).await;

    match err {
        OperationError::ExternalCommand(ref e) => assert_eq!(e.exit_code(), Some(1)),
        other => panic!("Unexpected error: {:?}", other),
    }
    assert_eq!(observer.percentages_for(operation), vec![0, -1]);
    assert!(ctx.temp_files().is_empty());
    assert!(ctx.stored_objects().is_empty());

    let audit = manager.recent_audit(None).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert!(audit[0].escalate);
    assert!(audit[0].message.contains("role does not exist"));
}

#[tokio::test]
async fn test_successful_backup_is_audited_without_escalation() {
    let ctx = TestContext::with_minimal_config();
    let manager = ctx.manager(MockProcessRunner::with_dump_size(10));

    let artifact = manager.backup(None).await.unwrap();

    let audit = manager.recent_audit(None).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert!(!audit[0].escalate);
    assert!(audit[0].message.contains(artifact.id.as_str()));
}

#[tokio::test]
async fn test_same_second_collision_is_a_conflict() {
    let ctx = TestContext::with_minimal_config();
    let runner = MockProcessRunner::with_dump_size(100);
    let manager = ctx.manager(runner.clone());
    let id = ArtifactId::parse("backup-20261016-020000.dump").unwrap();

    let (first, second) = tokio::join!(
        manager.backup_as(id.clone(), None),
        manager.backup_as(id.clone(), None)
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(OperationError::ArtifactConflict(_)))));

    // The stored artifact is the first one, untouched
    assert_eq!(runner.call_count("pg_dump"), 1);
    assert_eq!(ctx.stored_objects(), vec![id.to_string()]);
    assert!(ctx.temp_files().is_empty());
}

#[tokio::test]
async fn test_interrupted_upload_fails_cleanly() {
    let ctx = TestContext::with_minimal_config();
    let storage = Arc::new(FaultyStorage::new(ctx.local_storage()).fail_put_after(3));
    let manager = ctx.manager_with_storage(MockProcessRunner::with_dump_size(100_000), storage.clone());
    let channel = ProgressChannel::new();
    let observer = RecordingObserver::attach(&channel);

    let reporter = channel.reporter(test_utils::OperationKind::Backup);
    let operation = reporter.id();
    let err = manager.backup(Some(reporter)).await.unwrap_err();
    observer.wait_for_terminals(1).await;

    assert!(matches!(err, OperationError::Storage(_)), "{:?}", err);
    assert_eq!(storage.injected_failures(), 1);

    let percentages = observer.percentages_for(operation);
    assert_eq!(percentages.iter().filter(|p| **p == FAILED || **p == COMPLETE).count(), 1);
    assert_eq!(*percentages.last().unwrap(), FAILED);
    assert_eq!(&percentages[..2], &[0, 10]);
    assert_progress_invariant(&percentages);

    let audit = manager.recent_audit(None).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert!(audit[0].escalate);
    assert!(audit[0].message.contains("connection reset"));

    assert!(ctx.temp_files().is_empty(), "Leftover temp files: {:?}", ctx.temp_files());
    assert!(ctx.stored_objects().is_empty(), "Leftover objects: {:?}", ctx.stored_objects());
}
