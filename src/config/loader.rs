use super::types::*;
use super::expand_tilde;
use crate::utils::artifact::{is_valid_artifact_id, is_valid_database_name, ArtifactId};
use crate::utils::cron::CronSchedule;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load, expand and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    let config = parse_config(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse configuration text and expand `~` in every path
pub fn parse_config(contents: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(contents)?;
    expand_paths(&mut config);
    Ok(config)
}

fn expand_paths(config: &mut Config) {
    let global = &mut config.global;
    global.temp_directory = expand_tilde(&global.temp_directory);
    global.lock_directory = expand_tilde(&global.lock_directory);
    global.log_directory = expand_tilde(&global.log_directory);

    let database = &mut config.database;
    database.password_file = database.password_file.as_deref().map(expand_tilde);
    database.bin_directory = database.bin_directory.as_deref().map(expand_tilde);

    let storage = &mut config.storage;
    storage.path = storage.path.as_deref().map(expand_tilde);
    storage.secret_key_file = storage.secret_key_file.as_deref().map(expand_tilde);

    config.audit.path = expand_tilde(&config.audit.path);
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let prefix = &config.global.artifact_prefix;
    if !is_valid_artifact_id(prefix) {
        return Err(ConfigError::ValidationError(format!(
            "Invalid artifact prefix: {:?}",
            prefix
        )));
    }
    // Every generated id must stay valid, not just the prefix
    if prefix.len() > ArtifactId::max_prefix_len() {
        return Err(ConfigError::ValidationError(format!(
            "Artifact prefix is {} characters long, at most {} are allowed",
            prefix.len(),
            ArtifactId::max_prefix_len()
        )));
    }

    validate_database(&config.database)?;
    validate_storage(&config.storage)?;

    if config.audit.display_limit == 0 {
        return Err(ConfigError::ValidationError(
            "audit.display_limit must be at least 1".to_string(),
        ));
    }

    if let Some(ref schedule) = config.schedule {
        CronSchedule::parse(&schedule.cron).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid cron schedule {:?}: {}", schedule.cron, e))
        })?;
    }

    Ok(())
}

fn validate_database(database: &DatabaseConfig) -> Result<()> {
    if database.user.is_empty() {
        return Err(ConfigError::ValidationError(
            "database.user must not be empty".to_string(),
        ));
    }

    if !is_valid_database_name(&database.name) {
        return Err(ConfigError::ValidationError(format!(
            "Invalid database name: {:?}",
            database.name
        )));
    }

    if let Some(ref password_file) = database.password_file {
        if !password_file.exists() {
            return Err(ConfigError::ValidationError(format!(
                "Database password file does not exist: {:?}",
                password_file
            )));
        }
    }

    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<()> {
    if !is_valid_artifact_id(&storage.bucket) {
        return Err(ConfigError::ValidationError(format!(
            "Invalid bucket name: {:?}",
            storage.bucket
        )));
    }

    match storage.storage_type {
        StorageType::Local => {
            if storage.path.is_none() {
                return Err(ConfigError::ValidationError(
                    "Local storage requires storage.path".to_string(),
                ));
            }
        }
        StorageType::S3 => {
            let endpoint = storage.endpoint.as_deref().unwrap_or_default();
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "S3 storage requires an http(s) storage.endpoint, got {:?}",
                    endpoint
                )));
            }
            if storage.access_key_id.is_some() != storage.secret_key_file.is_some() {
                return Err(ConfigError::ValidationError(
                    "storage.access_key_id and storage.secret_key_file must be set together".to_string(),
                ));
            }
            if let Some(ref secret_key_file) = storage.secret_key_file {
                if !secret_key_file.exists() {
                    return Err(ConfigError::ValidationError(format!(
                        "Storage secret key file does not exist: {:?}",
                        secret_key_file
                    )));
                }
            }
        }
    }

    Ok(())
}
