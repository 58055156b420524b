use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Absent means no automatic backups
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Directory for dump/restore temporary files
    #[serde(default = "default_temp_directory")]
    pub temp_directory: PathBuf,

    /// Prefix of generated artifact identifiers
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,

    /// Allow at most one mutating operation per database at a time
    #[serde(default = "default_serialize_operations")]
    pub serialize_operations: bool,

    /// Lock files shared by every process working on the same databases
    #[serde(default = "default_lock_directory")]
    pub lock_directory: PathBuf,

    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Connection settings of the database being protected
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub user: String,
    pub name: String,

    /// File holding the password, handed to the tools as PGPASSWORD
    #[serde(default)]
    pub password_file: Option<PathBuf>,

    /// Directory containing pg_dump / pg_restore / createdb (PATH if unset)
    #[serde(default)]
    pub bin_directory: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Identity used to serialize operations against this database
    pub fn identity(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.name)
    }
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    pub bucket: String,

    /// Root directory (local storage)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Base URL of an S3-compatible endpoint (s3 storage)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub access_key_id: Option<String>,

    /// File holding the secret access key (s3 storage)
    #[serde(default)]
    pub secret_key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
}

/// Audit log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,

    /// Number of most recent entries returned for display
    #[serde(default = "default_display_limit")]
    pub display_limit: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            display_limit: default_display_limit(),
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub discord_webhook_url: String,
}

/// Recurring backup trigger
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Five-field cron expression, evaluated in UTC
    pub cron: String,
}

// Default value functions

fn default_temp_directory() -> PathBuf { std::env::temp_dir().join("pg-backup-manager") }
fn default_artifact_prefix() -> String { "backup".to_string() }
fn default_serialize_operations() -> bool { true }
fn default_lock_directory() -> PathBuf { std::env::temp_dir().join("pg-backup-manager-locks") }
fn default_region() -> String { "us-east-1".to_string() }
fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_db_host() -> String { "localhost".to_string() }
fn default_db_port() -> u16 { 5432 }
fn default_audit_path() -> PathBuf { PathBuf::from("~/.local/share/pg-backup-manager/audit.log") }
fn default_display_limit() -> usize { 50 }
