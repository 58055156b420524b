//! Test context and harness for integration testing
//!
//! Provides a unified context for setting up and tearing down test environments.

use crate::config_builder::ConfigBuilder;
use anyhow::Result;
use pg_backup_manager::config::Config;
use pg_backup_manager::managers::audit::AuditLog;
use pg_backup_manager::storage::{ObjectStorage, StorageClient};
use pg_backup_manager::utils::executor::mock::MockProcessRunner;
use pg_backup_manager::utils::locker::DatabaseLocks;
use pg_backup_manager::utils::postgres::PgTools;
use pg_backup_manager::BackupManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Test context that manages test resources and provides common utilities
pub struct TestContext {
    /// Temporary directory for test files
    temp_dir: TempDir,
    /// The test configuration
    config: Option<Config>,
}

impl TestContext {
    /// Create a new test context with a temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            config: None,
        }
    }

    /// Create a test context with a minimal configuration
    pub fn with_minimal_config() -> Self {
        Self::from_builder(ConfigBuilder::minimal())
    }

    /// Create a test context from a ConfigBuilder
    pub fn from_builder(builder: ConfigBuilder) -> Self {
        let (config, temp_dir) = builder.persist();

        Self {
            temp_dir,
            config: Some(config),
        }
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get the configuration
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    fn expect_config(&self) -> &Config {
        self.config
            .as_ref()
            .expect("TestContext was created without a configuration")
    }

    /// Local storage client over the context's bucket directory
    pub fn local_storage(&self) -> Arc<dyn StorageClient> {
        let config = self.expect_config();
        let root = config
            .storage
            .path
            .as_ref()
            .expect("Operation tests need local storage");
        Arc::new(ObjectStorage::local(root, &config.storage.bucket).expect("Failed to open bucket"))
    }

    /// Backup manager over the context's configuration, with local storage
    /// and the given mock runner in place of the PostgreSQL tools
    pub fn manager(&self, runner: MockProcessRunner) -> BackupManager {
        self.manager_with_storage(runner, self.local_storage())
    }

    /// Backup manager over an explicit storage client
    pub fn manager_with_storage(&self, runner: MockProcessRunner, storage: Arc<dyn StorageClient>) -> BackupManager {
        let config = self.expect_config();
        let tools = PgTools::from_config(&config.database).expect("Failed to read password file");
        let audit = Arc::new(AuditLog::new(&config.audit.path, config.audit.display_limit));

        BackupManager::new(
            storage,
            Arc::new(runner),
            tools,
            audit,
            &config.global.temp_directory,
        )
        .with_artifact_prefix(&config.global.artifact_prefix)
        .with_serialization(config.global.serialize_operations)
        .with_locks(DatabaseLocks::new(&config.global.lock_directory))
    }

    /// Write the configuration as TOML and return its path
    pub fn write_config(&self) -> PathBuf {
        let toml_str = toml::to_string_pretty(self.expect_config()).expect("Failed to serialize config");
        self.create_file("config.toml", &toml_str)
    }

    /// Entries currently in the operation temp directory
    pub fn temp_files(&self) -> Vec<PathBuf> {
        let dir = &self.expect_config().global.temp_directory;
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Objects currently stored in the bucket directory
    pub fn stored_objects(&self) -> Vec<String> {
        let config = self.expect_config();
        let Some(ref root) = config.storage.path else {
            return Vec::new();
        };
        let mut names: Vec<String> = std::fs::read_dir(root.join(&config.storage.bucket))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Raw lines of the audit log
    pub fn audit_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.expect_config().audit.path)
            .map(|content| content.lines().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Create a subdirectory in the temp dir
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Create a file in the temp dir
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Read a file from the temp directory
    pub fn read_file(&self, name: &str) -> Result<String> {
        let path = self.temp_dir.path().join(name);
        Ok(std::fs::read_to_string(path)?)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
