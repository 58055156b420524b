//! Named locks that keep mutating operations on one database from overlapping
//!
//! Two levels: an async mutex per database inside this process, and an
//! `fd-lock` file lock per database shared with every other process using
//! the same lock directory (the daemon and manual CLI runs).

use fd_lock::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Lock guard for one database; released on drop
pub struct DatabaseLock {
    _guard: OwnedMutexGuard<()>,
    // Dropping the sender lets the holder thread release the file lock
    _release: oneshot::Sender<()>,
    identity: String,
    path: PathBuf,
}

impl DatabaseLock {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Lock file backing this guard
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        debug!("Released database lock: {}", self.identity);
    }
}

/// Queue of waiters per database identity.
///
/// Callers wait their turn instead of failing, so a scheduled backup that
/// fires during a manual restore in another process runs once the restore
/// is finished.
#[derive(Clone)]
pub struct DatabaseLocks {
    directory: PathBuf,
    local: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl DatabaseLocks {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            local: Arc::default(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Lock file for `identity`, e.g. `db.internal_5432_app.lock`
    pub fn lock_path(&self, identity: &str) -> PathBuf {
        let name: String = identity
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.directory.join(format!("{}.lock", name))
    }

    /// Wait for exclusive access to the database named by `identity`
    pub async fn acquire(&self, identity: &str) -> io::Result<DatabaseLock> {
        let local = {
            let mut locks = self.local.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        if local.try_lock().is_err() {
            info!("Waiting for running operation on {} to finish", identity);
        }
        let guard = local.lock_owned().await;

        let path = self.lock_path(identity);
        tokio::fs::create_dir_all(&self.directory).await?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let release = hold_file_lock(file, identity.to_string()).await?;
        debug!("Acquired database lock: {} ({:?})", identity, path);

        Ok(DatabaseLock {
            _guard: guard,
            _release: release,
            identity: identity.to_string(),
            path,
        })
    }

    /// True while some operation of this process holds the lock for `identity`
    pub fn is_locked(&self, identity: &str) -> bool {
        let locks = self.local.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(identity)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Take the file lock on a dedicated thread that keeps the guard until the
/// returned sender is dropped. The guard borrows the lock, so it can't
/// outlive the thread's stack frame.
async fn hold_file_lock(file: File, identity: String) -> io::Result<oneshot::Sender<()>> {
    let (acquired_tx, acquired_rx) = oneshot::channel::<io::Result<()>>();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    std::thread::Builder::new()
        .name("database-lock".to_string())
        .spawn(move || {
            fn hold(
                guard: io::Result<fd_lock::RwLockWriteGuard<'_, File>>,
                acquired_tx: oneshot::Sender<io::Result<()>>,
                release_rx: oneshot::Receiver<()>,
            ) {
                match guard {
                    Ok(_guard) => {
                        // Caller gave up waiting: release right away
                        if acquired_tx.send(Ok(())).is_ok() {
                            let _ = release_rx.blocking_recv();
                        }
                    }
                    Err(e) => {
                        let _ = acquired_tx.send(Err(e));
                    }
                }
            }

            let mut lock = RwLock::new(file);
            let e = match lock.try_write() {
                Ok(guard) => return hold(Ok(guard), acquired_tx, release_rx),
                Err(e) => e,
            };
            if e.kind() == io::ErrorKind::WouldBlock {
                info!("Waiting for another process to finish its operation on {}", identity);
                hold(lock.write(), acquired_tx, release_rx)
            } else {
                hold(Err(e), acquired_tx, release_rx)
            }
        })?;

    match acquired_rx.await {
        Ok(Ok(())) => Ok(release_tx),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(io::Error::new(io::ErrorKind::Other, "lock thread exited")),
    }
}
