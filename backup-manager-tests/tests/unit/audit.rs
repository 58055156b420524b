//! Unit tests for the audit log file format

use pg_backup_manager::{AuditLog, Outcome};
use test_utils::{sample_audit_lines, TestContext};

#[tokio::test]
async fn test_reads_existing_log_newest_first() {
    let ctx = TestContext::new();
    let path = ctx.create_file("audit.log", &(sample_audit_lines().join("\n") + "\n"));
    let log = AuditLog::new(path, 50);

    let entries = log.recent(None).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries[0].message.starts_with("Restore of"));
    assert!(entries[0].escalate);
    assert!(entries[1].escalate);
    assert!(!entries[2].escalate);
    assert_eq!(
        entries[2].timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        "2026-10-14T02:00:03Z"
    );
}

#[tokio::test]
async fn test_skips_malformed_lines() {
    let ctx = TestContext::new();
    let mut lines = sample_audit_lines();
    lines.insert(1, "garbage without a timestamp");
    lines.push("2026-10-16T00:00:00Z UNKNOWN level");
    let path = ctx.create_file("audit.log", &lines.join("\n"));
    let log = AuditLog::new(path, 50);

    assert_eq!(log.recent(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_appends_after_existing_entries() {
    let ctx = TestContext::new();
    let path = ctx.create_file("audit.log", &(sample_audit_lines().join("\n") + "\n"));
    let log = AuditLog::new(path, 50);

    log.record("Backup backup-20261016-020000.dump completed", false, Outcome::Succeeded).await.unwrap();

    let entries = log.recent(Some(2)).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].message.contains("20261016"));
    assert_eq!(ctx.read_file("audit.log").unwrap().lines().count(), 4);
}

#[tokio::test]
async fn test_multiline_messages_stay_on_one_line() {
    let ctx = TestContext::new();
    let log = AuditLog::new(ctx.temp_dir().join("audit.log"), 50);

    log.record("Backup failed: pg_dump: error\nconnection refused", true, Outcome::Failed).await.unwrap();

    assert_eq!(ctx.read_file("audit.log").unwrap().lines().count(), 1);
    let entries = log.recent(None).await.unwrap();
    assert!(entries[0].message.contains("error connection refused"));
}

#[tokio::test]
async fn test_missing_log_is_empty() {
    let ctx = TestContext::new();
    let log = AuditLog::new(ctx.temp_dir().join("none").join("audit.log"), 50);
    assert!(log.recent(None).await.unwrap().is_empty());
}
