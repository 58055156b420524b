//! Streaming transfers between local files and the object store

use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::progress::{scale_progress, OperationReporter};
use crate::error::Result;
use crate::storage::{StorageClient, StorageError, TransferProgress};

/// Upload the file at `path` under `key`, feeding transfer progress to
/// `on_progress` while the upload runs. Returns the uploaded size.
pub async fn upload_file<F>(
    storage: &dyn StorageClient,
    key: &str,
    path: &Path,
    mut on_progress: F,
) -> Result<u64>
where
    F: FnMut(TransferProgress) + Send,
{
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let body = ReaderStream::new(file).boxed();

    let (sink, mut updates) = mpsc::unbounded_channel();
    let upload = storage.put(key, body, size, Some(sink));
    tokio::pin!(upload);

    let result = loop {
        tokio::select! {
            result = &mut upload => break result,
            Some(update) = updates.recv() => on_progress(update),
        }
    };

    // Updates sent just before the upload finished
    while let Ok(update) = updates.try_recv() {
        on_progress(update);
    }

    result?;
    debug!("Uploaded {:?} as {} ({} bytes)", path, key, size);
    Ok(size)
}

/// Stream the object `key` into a new file at `dest`. Returns the size.
///
/// The caller owns `dest` and removes it if this fails.
pub async fn download_file<F>(
    storage: &dyn StorageClient,
    key: &str,
    dest: &Path,
    mut on_progress: F,
) -> Result<u64>
where
    F: FnMut(TransferProgress) + Send,
{
    let object = storage.get(key).await?;
    let total = object.size;
    let mut body = object.body;
    let mut file = tokio::fs::File::create(dest).await?;

    let mut transferred = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| StorageError::Transport(format!("{}: {}", key, e)))?;
        file.write_all(&chunk).await?;
        transferred += chunk.len() as u64;
        on_progress(TransferProgress { transferred, total });
    }
    file.flush().await?;
    file.sync_all().await?;

    if transferred != total {
        return Err(StorageError::Transport(format!(
            "{}: expected {} bytes, received {}",
            key, total, transferred
        ))
        .into());
    }

    debug!("Downloaded {} to {:?} ({} bytes)", key, dest, total);
    Ok(total)
}

/// Progress callback mapping transfer ratios into `[start, end]` of an
/// operation; only changed percentages are reported.
pub fn phase_progress<'a>(
    reporter: &'a mut OperationReporter,
    message: String,
    start: i32,
    end: i32,
) -> impl FnMut(TransferProgress) + Send + 'a {
    let mut last = None;
    move |update: TransferProgress| {
        let percentage = scale_progress(update.ratio(), start, end);
        if last != Some(percentage) {
            last = Some(percentage);
            reporter.progress(message.clone(), percentage);
        }
    }
}
