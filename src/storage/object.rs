//! Bucket backed by `object_store`: a local directory or an S3-compatible service
//!
//! Uploads stream into a uniquely named staging object and are published
//! with a no-clobber copy, so concurrent writers of one key never mix their
//! bytes and exactly one of them wins.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, WriteMultipart};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{with_progress, ByteStream, ObjectStream, ProgressSink, Result, StorageClient, StorageError};
use crate::utils::artifact::is_valid_artifact_id;

/// Parts uploaded concurrently by one put
const MAX_PARTS_IN_FLIGHT: usize = 4;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15 * 60);

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Credentials and addressing of an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    scheme: &'static str,
    bucket: String,
    /// Bucket directory for local storage
    dir: Option<PathBuf>,
}

impl ObjectStorage {
    /// Open (creating if needed) the bucket directory `root/bucket`
    pub fn local(root: &Path, bucket: &str) -> Result<Self> {
        let dir = root.join(bucket);
        std::fs::create_dir_all(&dir)
            .map_err(|e| StorageError::Transport(format!("{:?}: {}", dir, e)))?;
        let store = LocalFileSystem::new_with_prefix(&dir)?;

        Ok(Self {
            store: Arc::new(store),
            scheme: "local",
            bucket: bucket.to_string(),
            dir: Some(dir),
        })
    }

    /// Path-style client for an S3-compatible endpoint (MinIO, Ceph, AWS)
    pub fn s3(settings: S3Settings) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&settings.endpoint)
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region)
            .with_allow_http(settings.endpoint.starts_with("http://"))
            .with_client_options(ClientOptions::default().with_timeout(REQUEST_TIMEOUT));
        if let Some(ref key_id) = settings.access_key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(ref secret) = settings.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        Ok(Self {
            store: Arc::new(builder.build()?),
            scheme: "s3",
            bucket: settings.bucket,
            dir: None,
        })
    }

    /// Wrap an existing store
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        Self {
            store,
            scheme: "store",
            bucket: bucket.to_string(),
            dir: None,
        }
    }

    /// Bucket directory, for local storage
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn object_path(key: &str) -> Result<ObjectPath> {
        if !is_valid_artifact_id(key) {
            return Err(StorageError::Transport(format!("Invalid object key: {:?}", key)));
        }
        Ok(ObjectPath::from(key))
    }

    /// Per-upload name; the leading dot keeps it out of listings
    fn staging_path(key: &str) -> ObjectPath {
        let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        ObjectPath::from(format!(".{}.{}-{}.partial", key, std::process::id(), n))
    }

    /// Map `object_store` errors for one key
    fn map_err(key: &str, err: object_store::Error) -> StorageError {
        match err {
            object_store::Error::NotFound { .. } => StorageError::not_found(key),
            object_store::Error::AlreadyExists { .. } => StorageError::already_exists(key),
            other => StorageError::Transport(format!("{}: {}", key, other)),
        }
    }

    /// Stream the body into `staging`, checking the byte count
    async fn upload_staging(&self, staging: &ObjectPath, mut body: ByteStream, size: u64) -> Result<()> {
        let upload = self.store.put_multipart(staging).await?;
        let mut writer = WriteMultipart::new(upload);

        let mut written = 0u64;
        let streamed = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| StorageError::Transport(e.to_string()))?;
                writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await?;
                written += chunk.len() as u64;
                writer.put(chunk);
            }
            if written != size {
                return Err(StorageError::Transport(format!(
                    "expected {} bytes, received {}",
                    size, written
                )));
            }
            Ok(())
        }
        .await;

        match streamed {
            Ok(()) => {
                writer.finish().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    warn!("Failed to abort upload {}: {}", staging, abort);
                }
                Err(e)
            }
        }
    }

    /// Make `staging` visible under `key` unless `key` already exists
    async fn publish(&self, staging: &ObjectPath, key: &str, path: &ObjectPath) -> Result<()> {
        match self.store.copy_if_not_exists(staging, path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotSupported { .. } | object_store::Error::NotImplemented) => {
                // S3 without a conditional copy mode: best effort
                match self.store.head(path).await {
                    Ok(_) => Err(StorageError::already_exists(key)),
                    Err(object_store::Error::NotFound { .. }) => {
                        self.store.copy(staging, path).await.map_err(|e| Self::map_err(key, e))
                    }
                    Err(e) => Err(Self::map_err(key, e)),
                }
            }
            Err(e) => Err(Self::map_err(key, e)),
        }
    }

    async fn remove_staging(&self, staging: &ObjectPath) {
        match self.store.delete(staging).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => warn!("Failed to remove staged upload {}: {}", staging, e),
        }
    }
}

#[async_trait]
impl StorageClient for ObjectStorage {
    async fn list(&self) -> Result<Vec<String>> {
        let objects: Vec<_> = self.store.list(None).try_collect().await?;
        Ok(objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            // Staged uploads are dot-prefixed and fail the allow-list
            .filter(|key| is_valid_artifact_id(key))
            .collect())
    }

    async fn head(&self, key: &str) -> Result<u64> {
        let path = Self::object_path(key)?;
        let meta = self.store.head(&path).await.map_err(|e| Self::map_err(key, e))?;
        Ok(meta.size as u64)
    }

    async fn get(&self, key: &str) -> Result<ObjectStream> {
        let path = Self::object_path(key)?;
        let result = self.store.get(&path).await.map_err(|e| Self::map_err(key, e))?;
        let size = result.meta.size as u64;
        let body = result
            .into_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .boxed();
        Ok(ObjectStream { size, body })
    }

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        progress: Option<ProgressSink>,
    ) -> Result<()> {
        let path = Self::object_path(key)?;
        let staging = Self::staging_path(key);

        let body = with_progress(body, size, progress);
        let result = match self.upload_staging(&staging, body, size).await {
            Ok(()) => self.publish(&staging, key, &path).await,
            Err(e) => Err(e),
        };
        self.remove_staging(&staging).await;

        match result {
            Ok(()) => {
                debug!("Stored {} ({} bytes) in {}", key, size, self.location(key));
                Ok(())
            }
            Err(StorageError::AlreadyExists { .. }) => Err(StorageError::already_exists(key)),
            Err(e) => Err(StorageError::Transport(format!("Upload of {} failed: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = Self::object_path(key)?;
        // S3 deletes of missing keys succeed silently
        self.store.head(&path).await.map_err(|e| Self::map_err(key, e))?;
        self.store.delete(&path).await.map_err(|e| Self::map_err(key, e))
    }

    fn location(&self, key: &str) -> String {
        format!("{}:{}/{}", self.scheme, self.bucket, key)
    }
}
