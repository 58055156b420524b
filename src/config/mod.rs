//! Configuration module for pg-backup-manager
//!
//! This module handles loading and validating configuration from TOML files.
//!
//! ## Example Usage
//!
//! ```no_run
//! use pg_backup_manager::config;
//!
//! let config = config::load_config("backup-config.toml")?;
//! println!("Database: {}", config.database.identity());
//! if let Some(schedule) = &config.schedule {
//!     println!("Scheduled backups: {}", schedule.cron);
//! }
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{load_config, parse_config, validate_config, ConfigError, Result};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

/// Read a secret file, trimming the trailing newline editors like to add
pub fn read_secret(path: &std::path::Path) -> std::io::Result<String> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.trim_end_matches(['\r', '\n']).to_string())
}
