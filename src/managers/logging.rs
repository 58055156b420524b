//! Diagnostic logging
//!
//! Two outputs:
//! - Console (stderr): INFO and above, short lines
//! - File: configured level and format, one file per day, oldest pruned

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{expand_tilde, GlobalConfig, LogFormat};

const LOG_FILE_PREFIX: &str = "pg-backup-manager.log";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_directory: PathBuf,
    /// Level of the file output; the console stays at INFO
    pub log_level: Level,
    pub format: LogFormat,
    /// Daily files kept after startup
    pub max_files: u32,
}

impl LoggingConfig {
    pub fn from_config(global: &GlobalConfig) -> Self {
        Self {
            log_directory: expand_tilde(&global.log_directory),
            log_level: parse_level(&global.log_level),
            format: global.log_format,
            max_files: global.log_max_files,
        }
    }
}

/// Unknown names fall back to INFO
fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit; dropping it flushes the file
/// writer.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let log_dir = &config.log_directory;
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (writer, file_guard) = tracing_appender::non_blocking(appender);

    let file_layer = match config.format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(level_filter(config.log_level))
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(false)
            .with_filter(level_filter(config.log_level))
            .boxed(),
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(level_filter(Level::INFO));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logging was already initialized")?;

    let removed = prune_logs(log_dir, config.max_files)?;
    if removed > 0 {
        tracing::debug!("Pruned {} old log file(s) in {:?}", removed, log_dir);
    }

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// RUST_LOG overrides the configured level
fn level_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,pg_backup_manager={}", level)))
}

/// Delete all but the newest `keep` daily files. Rotated files carry a
/// `.YYYY-MM-DD` suffix, so name order is age order.
fn prune_logs(log_dir: &Path, keep: u32) -> Result<usize> {
    let mut files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .map(|entry| entry.path())
        .collect();
    files.sort_unstable_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for path in files.into_iter().skip(keep as usize) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

/// Flushes the file writer when dropped
pub struct LogGuard {
    _file_guard: WorkerGuard,
}
