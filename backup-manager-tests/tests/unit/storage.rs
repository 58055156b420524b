//! Unit tests for storage clients built from configuration

use bytes::Bytes;
use futures::StreamExt;
use pg_backup_manager::storage::{self, ByteStream};
use test_utils::ConfigBuilder;

fn body(data: &'static [u8]) -> ByteStream {
    futures::stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
}

#[tokio::test]
async fn test_local_storage_from_config() {
    let builder = ConfigBuilder::minimal().with_bucket("nightly");
    let bucket_dir = builder.bucket_path().unwrap();
    let (config, _temp) = builder.persist();

    let client = storage::from_config(&config.storage).unwrap();
    client
        .put("backup-20261016-020000.dump", body(b"dump"), 4, None)
        .await
        .unwrap();

    assert!(bucket_dir.join("backup-20261016-020000.dump").exists());
    assert_eq!(client.list().await.unwrap().len(), 1);
    assert_eq!(
        client.location("backup-20261016-020000.dump"),
        "local:nightly/backup-20261016-020000.dump"
    );
}

#[tokio::test]
async fn test_local_storage_refuses_to_overwrite() {
    let (config, _temp) = ConfigBuilder::minimal().persist();
    let client = storage::from_config(&config.storage).unwrap();

    client.put("a.dump", body(b"first"), 5, None).await.unwrap();
    let err = client.put("a.dump", body(b"other"), 5, None).await.unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(client.head("a.dump").await.unwrap(), 5);
}

#[test]
fn test_s3_storage_from_config() {
    let (config, _temp) = ConfigBuilder::minimal()
        .with_s3_storage("http://127.0.0.1:9000")
        .with_s3_credentials("minio", "minio-secret")
        .persist();

    let client = storage::from_config(&config.storage).unwrap();
    assert_eq!(client.location("a.dump"), "s3:backups/a.dump");
}

#[test]
fn test_s3_storage_needs_readable_secret() {
    let (mut config, _temp) = ConfigBuilder::minimal()
        .with_s3_storage("http://127.0.0.1:9000")
        .with_s3_credentials("minio", "minio-secret")
        .persist();
    config.storage.secret_key_file = Some("/nonexistent/s3-secret".into());

    assert!(storage::from_config(&config.storage).is_err());
}
