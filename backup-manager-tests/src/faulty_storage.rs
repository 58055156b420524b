//! Storage double that breaks transfers part-way
//!
//! Wraps a real client and cuts upload or download bodies after a number of
//! chunks, the way a dropped connection would.

use async_trait::async_trait;
use futures::StreamExt;
use pg_backup_manager::storage::{self, ByteStream, ObjectStream, ProgressSink, StorageClient};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct FaultyStorage {
    inner: Arc<dyn StorageClient>,
    fail_put_after: Option<usize>,
    fail_get_after: Option<usize>,
    injected: Arc<AtomicUsize>,
}

impl FaultyStorage {
    pub fn new(inner: Arc<dyn StorageClient>) -> Self {
        Self {
            inner,
            fail_put_after: None,
            fail_get_after: None,
            injected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Uploads fail after `chunks` chunks went through
    pub fn fail_put_after(mut self, chunks: usize) -> Self {
        self.fail_put_after = Some(chunks);
        self
    }

    /// Downloads fail after `chunks` chunks were delivered
    pub fn fail_get_after(mut self, chunks: usize) -> Self {
        self.fail_get_after = Some(chunks);
        self
    }

    /// Number of transfers broken so far
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn cut(body: ByteStream, after: usize, injected: Arc<AtomicUsize>) -> ByteStream {
        let failure = futures::stream::once(async move {
            injected.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"))
        });
        body.take(after).chain(failure).boxed()
    }
}

#[async_trait]
impl StorageClient for FaultyStorage {
    async fn list(&self) -> storage::Result<Vec<String>> {
        self.inner.list().await
    }

    async fn head(&self, key: &str) -> storage::Result<u64> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> storage::Result<ObjectStream> {
        let object = self.inner.get(key).await?;
        match self.fail_get_after {
            Some(after) => Ok(ObjectStream {
                size: object.size,
                body: Self::cut(object.body, after, self.injected.clone()),
            }),
            None => Ok(object),
        }
    }

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        progress: Option<ProgressSink>,
    ) -> storage::Result<()> {
        let body = match self.fail_put_after {
            Some(after) => Self::cut(body, after, self.injected.clone()),
            None => body,
        };
        self.inner.put(key, body, size, progress).await
    }

    async fn delete(&self, key: &str) -> storage::Result<()> {
        self.inner.delete(key).await
    }

    fn location(&self, key: &str) -> String {
        self.inner.location(key)
    }
}
