//! Tests for listing, deleting and downloading artifacts

use pg_backup_manager::managers::audit::AuditLog;
use pg_backup_manager::Outcome;
use test_utils::{sample_artifact_ids, ArtifactId, ConfigBuilder, MockProcessRunner, TestContext};

#[tokio::test]
async fn test_list_is_newest_first() {
    let ctx = TestContext::with_minimal_config();
    let manager = ctx.manager(MockProcessRunner::with_dump_size(10));

    let ids = sample_artifact_ids(3);
    // Out of order on purpose
    for id in [&ids[1], &ids[0], &ids[2]] {
        manager.backup_as(ArtifactId::parse(id).unwrap(), None).await.unwrap();
    }

    let listed: Vec<String> = manager
        .list_artifacts()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id.to_string())
        .collect();
    assert_eq!(listed, vec![ids[2].clone(), ids[1].clone(), ids[0].clone()]);
}

#[tokio::test]
async fn test_list_ignores_foreign_files() {
    let builder = ConfigBuilder::minimal();
    let bucket = builder.bucket_path().unwrap();
    let ctx = TestContext::from_builder(builder);
    let manager = ctx.manager(MockProcessRunner::with_dump_size(10));

    manager.backup(None).await.unwrap();
    std::fs::write(bucket.join(".backup-x.dump.partial"), b"partial").unwrap();
    std::fs::create_dir_all(bucket.join("nested")).unwrap();

    assert_eq!(manager.list_artifacts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_artifact() {
    let ctx = TestContext::with_minimal_config();
    let manager = ctx.manager(MockProcessRunner::with_dump_size(10));

    let artifact = manager.backup(None).await.unwrap();
    manager.delete_artifact(artifact.id.as_str()).await.unwrap();

    assert!(manager.list_artifacts().await.unwrap().is_empty());
    let audit = manager.recent_audit(Some(1)).await.unwrap();
    assert!(audit[0].escalate);
    assert!(audit[0].message.contains("Deleted"));
}

#[tokio::test]
async fn test_missing_artifacts_are_not_found_and_audit_stays_intact() {
    let ctx = TestContext::with_minimal_config();
    let manager = ctx.manager(MockProcessRunner::with_dump_size(10));
    manager.backup(None).await.unwrap();

    let missing = "backup-19990101-000000.dump";
    assert!(manager.delete_artifact(missing).await.unwrap_err().is_not_found());

    let dest = ctx.temp_dir().join("download.dump");
    assert!(manager.download_artifact(missing, &dest).await.unwrap_err().is_not_found());
    assert!(!dest.exists());

    // Every line is still a well-formed entry
    let lines = ctx.audit_lines();
    assert_eq!(lines.len(), 3);
    let entries = manager.recent_audit(None).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries[0].escalate && entries[1].escalate);
    assert!(!entries[2].escalate);

    // And the process keeps working
    assert_eq!(manager.list_artifacts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_download_artifact() {
    let ctx = TestContext::with_minimal_config();
    let manager = ctx.manager(MockProcessRunner::with_dump_size(70_000));
    let artifact = manager.backup(None).await.unwrap();

    let out_dir = ctx.create_subdir("downloads");
    let dest = out_dir.join("copy.dump");
    let size = manager.download_artifact(artifact.id.as_str(), &dest).await.unwrap();

    assert_eq!(size, 70_000);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 70_000);
    // No partial files left next to the output
    assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 1);

    // Successful downloads are audited without escalation
    let audit = manager.recent_audit(Some(1)).await.unwrap();
    assert!(!audit[0].escalate);
}

#[tokio::test]
async fn test_recent_audit_respects_display_limit() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_display_limit(2));
    let manager = ctx.manager(MockProcessRunner::with_dump_size(10));

    for id in sample_artifact_ids(4) {
        manager.backup_as(ArtifactId::parse(&id).unwrap(), None).await.unwrap();
    }

    assert_eq!(ctx.audit_lines().len(), 4);
    let shown = manager.recent_audit(None).await.unwrap();
    assert_eq!(shown.len(), 2);
    assert!(shown[0].message.contains("backup-20261004-020000.dump"));
    assert_eq!(manager.recent_audit(Some(10)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_audit_log_is_shared_between_writers() {
    let ctx = TestContext::with_minimal_config();
    let path = ctx.config().unwrap().audit.path.clone();
    let first = AuditLog::new(path.clone(), 100);
    let second = AuditLog::new(path.clone(), 100);

    let writes = (0..20).map(|i| {
        let log = if i % 2 == 0 { &first } else { &second };
        log.record(format!("entry {}", i), false, Outcome::Succeeded)
    });
    for result in futures::future::join_all(writes).await {
        result.unwrap();
    }

    let entries = first.recent(None).await.unwrap();
    assert_eq!(entries.len(), 20);
    assert_eq!(ctx.audit_lines().len(), 20);
}
