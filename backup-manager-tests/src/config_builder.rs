//! Fluent API for building test configurations
//!
//! Provides a builder pattern for creating test configurations with sensible defaults.

use pg_backup_manager::config::{
    AuditConfig, Config, DatabaseConfig, GlobalConfig, LogFormat, NotificationConfig,
    ScheduleConfig, StorageConfig, StorageType,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    global: GlobalConfig,
    database: DatabaseConfig,
    storage: StorageConfig,
    audit: AuditConfig,
    notifications: NotificationConfig,
    schedule: Option<ScheduleConfig>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with minimal defaults
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        // Create default password file
        let password_file = temp_dir.path().join("db-password");
        fs::write(&password_file, "test-password-123\n").expect("Failed to write password file");

        let log_directory = temp_dir.path().join("logs");
        fs::create_dir_all(&log_directory).expect("Failed to create log_directory");

        let storage_root = temp_dir.path().join("storage");
        fs::create_dir_all(&storage_root).expect("Failed to create storage root");

        let global = GlobalConfig {
            temp_directory: temp_dir.path().join("tmp"),
            artifact_prefix: "backup".to_string(),
            serialize_operations: true,
            lock_directory: temp_dir.path().join("locks"),
            log_directory,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_max_files: 5,
        };

        let database = DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            name: "appdb".to_string(),
            password_file: Some(password_file),
            bin_directory: None,
        };

        let storage = StorageConfig {
            storage_type: StorageType::Local,
            bucket: "backups".to_string(),
            path: Some(storage_root),
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_key_file: None,
        };

        let audit = AuditConfig {
            path: temp_dir.path().join("audit").join("audit.log"),
            display_limit: 50,
        };

        Self {
            temp_dir,
            global,
            database,
            storage,
            audit,
            notifications: NotificationConfig::default(),
            schedule: None,
        }
    }

    /// Local storage, no schedule, no notifications
    pub fn minimal() -> Self {
        Self::new()
    }

    pub fn with_database(mut self, host: &str, port: u16, user: &str, name: &str) -> Self {
        self.database.host = host.to_string();
        self.database.port = port;
        self.database.user = user.to_string();
        self.database.name = name.to_string();
        self
    }

    pub fn with_database_name(mut self, name: &str) -> Self {
        self.database.name = name.to_string();
        self
    }

    /// Set the password file path
    pub fn with_password_file(mut self, path: &Path) -> Self {
        self.database.password_file = Some(path.to_path_buf());
        self
    }

    /// Write the password file content
    pub fn with_password(self, password: &str) -> Self {
        if let Some(ref path) = self.database.password_file {
            fs::write(path, password).expect("Failed to write password file");
        }
        self
    }

    /// Set the log directory
    pub fn with_log_dir(mut self, path: &Path) -> Self {
        self.global.log_directory = path.to_path_buf();
        self
    }

    pub fn with_temp_directory(mut self, path: &Path) -> Self {
        self.global.temp_directory = path.to_path_buf();
        self
    }

    pub fn with_artifact_prefix(mut self, prefix: &str) -> Self {
        self.global.artifact_prefix = prefix.to_string();
        self
    }

    /// Let operations on the same database overlap
    pub fn without_serialization(mut self) -> Self {
        self.global.serialize_operations = false;
        self
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.storage.bucket = bucket.to_string();
        self
    }

    /// Switch to an S3-compatible endpoint
    pub fn with_s3_storage(mut self, endpoint: &str) -> Self {
        self.storage.storage_type = StorageType::S3;
        self.storage.endpoint = Some(endpoint.to_string());
        self.storage.path = None;
        self
    }

    /// Static S3 credentials; the secret is written to a file
    pub fn with_s3_credentials(mut self, access_key_id: &str, secret: &str) -> Self {
        let secret_file = self.temp_dir.path().join("s3-secret");
        fs::write(&secret_file, secret).expect("Failed to write secret key file");
        self.storage.access_key_id = Some(access_key_id.to_string());
        self.storage.secret_key_file = Some(secret_file);
        self
    }

    /// Share a lock directory with another context, like a daemon and a
    /// CLI run on one host
    pub fn with_lock_directory(mut self, path: &Path) -> Self {
        self.global.lock_directory = path.to_path_buf();
        self
    }

    pub fn with_display_limit(mut self, limit: usize) -> Self {
        self.audit.display_limit = limit;
        self
    }

    pub fn with_schedule(mut self, cron: &str) -> Self {
        self.schedule = Some(ScheduleConfig {
            cron: cron.to_string(),
        });
        self
    }

    /// Set notification configuration
    pub fn with_notifications(mut self, config: NotificationConfig) -> Self {
        self.notifications = config;
        self
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get the password file path
    pub fn password_file(&self) -> Option<&Path> {
        self.database.password_file.as_deref()
    }

    /// Directory holding the bucket's objects (local storage)
    pub fn bucket_path(&self) -> Option<PathBuf> {
        self.storage
            .path
            .as_ref()
            .map(|root| root.join(&self.storage.bucket))
    }

    /// Build the Config (the temp directory and its files are removed)
    pub fn build(self) -> Config {
        self.persist().0
    }

    /// Keep the temp directory (don't delete on drop)
    pub fn persist(self) -> (Config, TempDir) {
        let config = Config {
            global: self.global,
            database: self.database,
            storage: self.storage,
            audit: self.audit,
            notifications: self.notifications,
            schedule: self.schedule,
        };
        (config, self.temp_dir)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
