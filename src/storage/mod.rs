//! Remote object storage for backup artifacts
//!
//! One client talks to one bucket. Transfers are byte streams; uploads
//! report cumulative progress after every chunk through a [`ProgressSink`].

mod object;

pub use object::{ObjectStorage, S3Settings};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{read_secret, StorageConfig, StorageType};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object '{key}' not found")]
    NotFound { key: String },

    #[error("Object '{key}' already exists")]
    AlreadyExists { key: String },

    #[error("Storage transport failure: {0}")]
    Transport(String),
}

impl StorageError {
    pub fn not_found(key: &str) -> Self {
        StorageError::NotFound {
            key: key.to_string(),
        }
    }

    pub fn already_exists(key: &str) -> Self {
        StorageError::AlreadyExists {
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound { key: path },
            object_store::Error::AlreadyExists { path, .. } => StorageError::AlreadyExists { key: path },
            other => StorageError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Stream of object bytes
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Object body together with its size, fetched before streaming starts
pub struct ObjectStream {
    pub size: u64,
    pub body: ByteStream,
}

/// Cumulative transfer position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
}

impl TransferProgress {
    /// Completed fraction in [0, 1]; an empty transfer counts as complete
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.transferred as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Receiver side of transfer progress; closed receivers are ignored
pub type ProgressSink = mpsc::UnboundedSender<TransferProgress>;

/// Capability set of the object store
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Keys currently in the bucket, in no particular order
    async fn list(&self) -> Result<Vec<String>>;

    /// Size of an object in bytes
    async fn head(&self, key: &str) -> Result<u64>;

    /// Open an object for streaming
    async fn get(&self, key: &str) -> Result<ObjectStream>;

    /// Store `size` bytes read from `body` under `key`.
    ///
    /// The object only becomes visible once the whole body was accepted.
    /// An existing object is never replaced: the put fails with
    /// [`StorageError::AlreadyExists`].
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        progress: Option<ProgressSink>,
    ) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Human-readable location of a key, for logs and listings
    fn location(&self, key: &str) -> String;
}

/// Attach a progress sink to a body: after each chunk the cumulative byte
/// count is sent.
pub fn with_progress(body: ByteStream, total: u64, progress: Option<ProgressSink>) -> ByteStream {
    let Some(sink) = progress else {
        return body;
    };

    let mut transferred = 0u64;
    body.inspect(move |chunk| {
        if let Ok(bytes) = chunk {
            transferred += bytes.len() as u64;
            // Observer gone: keep transferring
            let _ = sink.send(TransferProgress { transferred, total });
        }
    })
    .boxed()
}

/// Build the storage client described by the configuration
pub fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageClient>> {
    match config.storage_type {
        StorageType::Local => {
            let root = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Local storage requires storage.path"))?;
            Ok(Arc::new(ObjectStorage::local(root, &config.bucket)?))
        }
        StorageType::S3 => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires storage.endpoint"))?;
            let secret_access_key = config
                .secret_key_file
                .as_deref()
                .map(read_secret)
                .transpose()?;
            Ok(Arc::new(ObjectStorage::s3(S3Settings {
                endpoint,
                bucket: config.bucket.clone(),
                region: config.region.clone(),
                access_key_id: config.access_key_id.clone(),
                secret_access_key,
            })?))
        }
    }
}
