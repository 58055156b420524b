//! Backup manager - orchestrates backup, restore and disaster recovery

use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempPath;
use tracing::{debug, error, info, warn};

use super::audit::{AuditEntry, AuditLog};
use super::notification::{DiscordNotifier, Notifier, Outcome};
use super::progress::{OperationKind, OperationReporter};
use super::transfer::{download_file, phase_progress, upload_file};
use crate::config::Config;
use crate::error::{OperationError, Result};
use crate::storage::{self, StorageClient};
use crate::utils::artifact::{isolated_database_name, Artifact, ArtifactId};
use crate::utils::executor::{ProcessRunner, TokioProcessRunner};
use crate::utils::format::{format_bytes, format_duration};
use crate::utils::locker::{DatabaseLock, DatabaseLocks};
use crate::utils::postgres::PgTools;

/// Phases every orchestrated run moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Starting,
    RunningExternalCommand,
    Transferring,
    Completed,
    Failed,
}

/// State and progress of one in-flight run
struct Run {
    reporter: OperationReporter,
    state: OperationState,
    started: Instant,
}

impl Run {
    fn new(kind: OperationKind, reporter: Option<OperationReporter>) -> Self {
        Self {
            reporter: reporter.unwrap_or_else(|| OperationReporter::silent(kind)),
            state: OperationState::Idle,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, state: OperationState) {
        debug!(
            "{} {}: {:?} -> {:?}",
            self.reporter.kind(),
            self.reporter.id(),
            self.state,
            state
        );
        self.state = state;
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("operation", &self.reporter.id())
            .field("state", &self.state)
            .finish()
    }
}

pub struct BackupManager {
    storage: Arc<dyn StorageClient>,
    runner: Arc<dyn ProcessRunner>,
    tools: PgTools,
    audit: Arc<AuditLog>,
    locks: DatabaseLocks,
    temp_directory: PathBuf,
    artifact_prefix: String,
    serialize_operations: bool,
}

impl BackupManager {
    pub fn new(
        storage: Arc<dyn StorageClient>,
        runner: Arc<dyn ProcessRunner>,
        tools: PgTools,
        audit: Arc<AuditLog>,
        temp_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            runner,
            tools,
            audit,
            locks: DatabaseLocks::new(std::env::temp_dir().join("pg-backup-manager-locks")),
            temp_directory: temp_directory.into(),
            artifact_prefix: "backup".to_string(),
            serialize_operations: true,
        }
    }

    /// Wire up the real collaborators described by the configuration
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let storage = storage::from_config(&config.storage)?;
        let tools = PgTools::from_config(&config.database)?;

        let mut audit = AuditLog::new(&config.audit.path, config.audit.display_limit);
        if let Some(notifier) = DiscordNotifier::from_config(&config.notifications)? {
            let notifier: Arc<dyn Notifier> = Arc::new(notifier);
            audit = audit.with_notifier(notifier);
        }

        Ok(Self::new(
            storage,
            Arc::new(TokioProcessRunner::new()),
            tools,
            Arc::new(audit),
            &config.global.temp_directory,
        )
        .with_artifact_prefix(&config.global.artifact_prefix)
        .with_serialization(config.global.serialize_operations)
        .with_locks(DatabaseLocks::new(&config.global.lock_directory)))
    }

    pub fn with_artifact_prefix(mut self, prefix: &str) -> Self {
        self.artifact_prefix = prefix.to_string();
        self
    }

    /// `false` lets runs against the same database overlap
    pub fn with_serialization(mut self, serialize: bool) -> Self {
        self.serialize_operations = serialize;
        self
    }

    /// Lock table to queue on; managers and processes sharing its directory
    /// exclude each other
    pub fn with_locks(mut self, locks: DatabaseLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn storage(&self) -> &dyn StorageClient {
        self.storage.as_ref()
    }

    pub fn database_name(&self) -> &str {
        &self.tools.database().name
    }

    async fn lock_database(&self) -> Result<Option<DatabaseLock>> {
        if !self.serialize_operations {
            return Ok(None);
        }
        Ok(Some(self.locks.acquire(&self.tools.database().identity()).await?))
    }

    /// Fresh temp file in the temp directory; removed when dropped
    async fn temp_file(&self, kind: OperationKind) -> Result<TempPath> {
        tokio::fs::create_dir_all(&self.temp_directory).await?;
        let prefix = format!("{}-", kind).replace(' ', "-");
        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".dump")
            .tempfile_in(&self.temp_directory)?;
        Ok(file.into_temp_path())
    }

    /// Record the outcome of a run: terminal progress event, log line and
    /// audit entry. Failures are always escalated.
    async fn finish<T>(
        &self,
        mut run: Run,
        result: Result<T>,
        success: impl FnOnce(&T) -> String,
        failure: impl FnOnce() -> String,
        escalate_success: bool,
    ) -> Result<T> {
        let elapsed = format_duration(run.started.elapsed());
        match result {
            Ok(value) => {
                run.enter(OperationState::Completed);
                let message = success(&value);
                info!("{} (took {})", message, elapsed);
                run.reporter.complete(message.clone());
                self.audit_entry(message, escalate_success, Outcome::Succeeded).await;
                Ok(value)
            }
            Err(e) => {
                run.enter(OperationState::Failed);
                let message = format!("{}: {}", failure(), e);
                error!("{} (after {})", message, elapsed);
                run.reporter.fail(message.clone());
                self.audit_entry(message, true, Outcome::Failed).await;
                Err(e)
            }
        }
    }

    async fn audit_entry(&self, message: String, escalate: bool, outcome: Outcome) {
        if let Err(e) = self.audit.record(message, escalate, outcome).await {
            warn!("Failed to write audit entry: {}", e);
        }
    }

    /// Dump the database and upload it under a fresh time-derived identifier
    pub async fn backup(&self, reporter: Option<OperationReporter>) -> Result<Artifact> {
        match ArtifactId::from_timestamp(&self.artifact_prefix, Utc::now()) {
            Ok(id) => self.backup_as(id, reporter).await,
            Err(e) => {
                let run = Run::new(OperationKind::Backup, reporter);
                self.finish(run, Err(e), |_: &Artifact| String::new(), || "Backup failed".to_string(), false)
                    .await
            }
        }
    }

    /// Backup under an explicit identifier; fails with a conflict if an
    /// artifact with that identifier already exists.
    pub async fn backup_as(&self, id: ArtifactId, reporter: Option<OperationReporter>) -> Result<Artifact> {
        let mut run = Run::new(OperationKind::Backup, reporter);
        run.enter(OperationState::Starting);
        run.reporter.progress(format!("Starting backup {}", id), 0);
        info!("Starting backup of '{}' as {}", self.database_name(), id);

        let result = async {
            let _lock = self.lock_database().await?;
            self.run_backup(&id, &mut run).await
        }
        .await;

        // Scheduled and manual backups only escalate failures
        self.finish(
            run,
            result,
            |artifact| {
                format!(
                    "Backup {} completed ({})",
                    artifact.id,
                    format_bytes(artifact.size)
                )
            },
            || format!("Backup {} failed", id),
            false,
        )
        .await
    }

    async fn run_backup(&self, id: &ArtifactId, run: &mut Run) -> Result<Artifact> {
        match self.storage.head(id.as_str()).await {
            Ok(_) => return Err(OperationError::ArtifactConflict(id.to_string())),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let dump = self.temp_file(OperationKind::Backup).await?;

        run.enter(OperationState::RunningExternalCommand);
        self.runner.run(&self.tools.dump(&dump)).await?;
        run.reporter.progress(format!("Database dumped, uploading {}", id), 10);

        run.enter(OperationState::Transferring);
        let size = upload_file(
            self.storage.as_ref(),
            id.as_str(),
            &dump,
            phase_progress(&mut run.reporter, format!("Uploading {}", id), 10, 100),
        )
        .await
        .map_err(OperationError::into_conflict)?;

        remove_temp(dump);
        Ok(Artifact {
            id: id.clone(),
            size,
            location: self.storage.location(id.as_str()),
        })
    }

    /// Replace the configured database's contents with an artifact
    pub async fn restore(&self, id: &str, reporter: Option<OperationReporter>) -> Result<()> {
        let mut run = Run::new(OperationKind::Restore, reporter);
        run.enter(OperationState::Starting);
        run.reporter.progress(format!("Starting restore of {}", id), 0);
        info!("Starting restore of {} into '{}'", id, self.database_name());

        let result = async {
            let id = ArtifactId::parse(id)?;
            let _lock = self.lock_database().await?;
            let target = self.database_name().to_string();
            self.download_and_restore(&id, &target, 0, &mut run).await
        }
        .await;

        let database = self.database_name().to_string();
        self.finish(
            run,
            result,
            |_| format!("Restore of {} into '{}' completed", id, database),
            || format!("Restore of {} failed", id),
            true,
        )
        .await
    }

    /// Restore an artifact into a new, isolated database. Returns the
    /// database name. The isolated database is left in place.
    pub async fn disaster_recovery(&self, id: &str, reporter: Option<OperationReporter>) -> Result<String> {
        let mut run = Run::new(OperationKind::DisasterRecovery, reporter);
        run.enter(OperationState::Starting);
        run.reporter.progress(format!("Starting disaster recovery from {}", id), 0);
        info!("Starting disaster recovery from {}", id);

        let result = async {
            let id = ArtifactId::parse(id)?;
            let isolated = isolated_database_name(self.database_name(), Utc::now());

            run.enter(OperationState::RunningExternalCommand);
            self.runner.run(&self.tools.create_database(&isolated)?).await?;
            run.reporter
                .progress(format!("Created isolated database '{}'", isolated), 10);

            self.download_and_restore(&id, &isolated, 10, &mut run).await?;
            Ok::<_, OperationError>(isolated)
        }
        .await;

        self.finish(
            run,
            result,
            |isolated| format!("Disaster recovery from {} into '{}' completed", id, isolated),
            || format!("Disaster recovery from {} failed", id),
            true,
        )
        .await
    }

    /// Download into a temp file (progress mapped into `[start, 80]`), then
    /// restore it into `target` (80 before, 100 after)
    async fn download_and_restore(
        &self,
        id: &ArtifactId,
        target: &str,
        start: i32,
        run: &mut Run,
    ) -> Result<()> {
        let archive = self.temp_file(run.reporter.kind()).await?;

        run.enter(OperationState::Transferring);
        download_file(
            self.storage.as_ref(),
            id.as_str(),
            &archive,
            phase_progress(&mut run.reporter, format!("Downloading {}", id), start, 80),
        )
        .await?;

        run.reporter.progress(format!("Restoring into '{}'", target), 80);
        run.enter(OperationState::RunningExternalCommand);
        self.runner.run(&self.tools.restore(&archive, target)?).await?;

        remove_temp(archive);
        Ok(())
    }

    /// Delete an artifact from storage
    pub async fn delete_artifact(&self, id: &str) -> Result<()> {
        let result = async {
            let id = ArtifactId::parse(id)?;
            self.storage.delete(id.as_str()).await?;
            Ok::<_, OperationError>(())
        }
        .await;

        let (message, outcome, result) = match result {
            Ok(()) => {
                info!("Deleted artifact {}", id);
                (format!("Deleted artifact {}", id), Outcome::Succeeded, Ok(()))
            }
            Err(e) => {
                error!("Failed to delete artifact {}: {}", id, e);
                (format!("Delete of {} failed: {}", id, e), Outcome::Failed, Err(e))
            }
        };
        self.audit_entry(message, true, outcome).await;
        result
    }

    /// Copy an artifact to a local file. The file only appears once the
    /// whole artifact was received.
    pub async fn download_artifact(&self, id: &str, dest: &Path) -> Result<u64> {
        let result = async {
            let id = ArtifactId::parse(id)?;
            let dir = match dest.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let partial = tempfile::Builder::new()
                .prefix(".download-")
                .tempfile_in(dir)?
                .into_temp_path();

            let size = download_file(self.storage.as_ref(), id.as_str(), &partial, |_| {}).await?;
            partial.persist(dest).map_err(|e| e.error)?;
            Ok::<_, OperationError>(size)
        }
        .await;

        match result {
            Ok(size) => {
                let message = format!("Downloaded {} to {} ({})", id, dest.display(), format_bytes(size));
                info!("{}", message);
                self.audit_entry(message, false, Outcome::Succeeded).await;
                Ok(size)
            }
            Err(e) => {
                let message = format!("Download of {} failed: {}", id, e);
                error!("{}", message);
                self.audit_entry(message, true, Outcome::Failed).await;
                Err(e)
            }
        }
    }

    /// Every artifact in storage, newest first
    pub async fn list_artifacts(&self) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for key in self.storage.list().await? {
            let Ok(id) = ArtifactId::parse(&key) else {
                debug!("Ignoring foreign object {:?}", key);
                continue;
            };
            match self.storage.head(id.as_str()).await {
                Ok(size) => artifacts.push(Artifact {
                    location: self.storage.location(id.as_str()),
                    id,
                    size,
                }),
                // Deleted since the listing
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        artifacts.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(artifacts)
    }

    /// Most recent audit entries, newest first
    pub async fn recent_audit(&self, limit: Option<usize>) -> Result<Vec<AuditEntry>> {
        Ok(self.audit.recent(limit).await?)
    }

    /// Wait for escalations still being delivered
    pub async fn wait_for_escalations(&self) {
        self.audit.wait_for_escalations().await;
    }
}

fn remove_temp(path: TempPath) {
    let temp_path = path.to_path_buf();
    if let Err(e) = path.close() {
        warn!("Failed to remove temp file {:?}: {}", temp_path, e);
    }
}
