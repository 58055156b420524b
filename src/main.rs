use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pg_backup_manager::config::{self, Config};
use pg_backup_manager::managers::logging::{init_logging, LoggingConfig};
use pg_backup_manager::managers::progress::{OperationKind, OperationReporter, ProgressChannel, FAILED};
use pg_backup_manager::managers::scheduler;
use pg_backup_manager::utils::format::format_bytes;
use pg_backup_manager::utils::postgres::PgTools;
use pg_backup_manager::BackupManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pg-backup-manager")]
#[command(about = "Backup, restore and disaster recovery for a PostgreSQL database", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "backup-config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the database and upload a new artifact
    Backup,

    /// Restore an artifact into the configured database
    Restore {
        /// Artifact identifier
        artifact: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Restore an artifact into a new, isolated database
    Recover {
        /// Artifact identifier
        artifact: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete an artifact from storage
    Delete {
        /// Artifact identifier
        artifact: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Copy an artifact to a local file
    Download {
        /// Artifact identifier
        artifact: String,

        /// Output file (defaults to the artifact name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List artifacts, newest first
    List,

    /// Show recent audit log entries, newest first
    Log {
        /// Number of entries (capped by audit.display_limit)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Run scheduled backups until interrupted
    Daemon,

    /// Validate configuration file
    Validate,
}

impl Commands {
    fn needs_pg_tools(&self) -> bool {
        matches!(
            self,
            Commands::Backup | Commands::Restore { .. } | Commands::Recover { .. } | Commands::Daemon
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    if let Commands::Validate = cli.command {
        print_validation(&config);
        return Ok(());
    }

    // Setup logging with file rotation (must keep guard alive)
    let _log_guard = init_logging(&LoggingConfig::from_config(&config.global))?;

    if cli.command.needs_pg_tools() {
        let tools = PgTools::from_config(&config.database).context("Failed to read database password")?;
        let missing = tools.missing_tools();
        if !missing.is_empty() {
            eprintln!("⚠️  PostgreSQL client tools not found: {}", missing.join(", "));
            eprintln!();
            eprintln!("Install the PostgreSQL client package, or set database.bin_directory");
            eprintln!("to the directory containing pg_dump, pg_restore and createdb.");
            std::process::exit(1);
        }
    }

    let manager = Arc::new(BackupManager::from_config(&config)?);
    let result = run_command(cli.command, &config, manager.clone()).await;

    // Escalations still in flight
    manager.wait_for_escalations().await;
    result
}

async fn run_command(command: Commands, config: &Config, manager: Arc<BackupManager>) -> Result<()> {
    let progress = ProgressChannel::new();

    match command {
        Commands::Backup => {
            println!("Running backup of '{}'...", manager.database_name());
            let (reporter, observer) = observe(&progress, OperationKind::Backup);
            let result = manager.backup(Some(reporter)).await;
            let _ = observer.await;
            let artifact = result?;
            println!("✓ Backup completed: {} ({})", artifact.id, format_bytes(artifact.size));
            println!("  Location: {}", artifact.location);
        }

        Commands::Restore { artifact, yes } => {
            let prompt = format!(
                "Restore {} into '{}'? Existing data will be replaced",
                artifact,
                manager.database_name()
            );
            if !yes && !confirm(&prompt)? {
                println!("Restore cancelled.");
                return Ok(());
            }

            let (reporter, observer) = observe(&progress, OperationKind::Restore);
            let result = manager.restore(&artifact, Some(reporter)).await;
            let _ = observer.await;
            result?;
            println!("✓ Restore completed successfully!");
        }

        Commands::Recover { artifact, yes } => {
            let prompt = format!("Restore {} into a new isolated database?", artifact);
            if !yes && !confirm(&prompt)? {
                println!("Recovery cancelled.");
                return Ok(());
            }

            let (reporter, observer) = observe(&progress, OperationKind::DisasterRecovery);
            let result = manager.disaster_recovery(&artifact, Some(reporter)).await;
            let _ = observer.await;
            let database = result?;
            println!("✓ Recovered into database '{}'", database);
            println!("  The database is not dropped automatically.");
        }

        Commands::Delete { artifact, yes } => {
            let prompt = format!("Permanently delete {}?", artifact);
            if !yes && !confirm(&prompt)? {
                println!("Delete cancelled.");
                return Ok(());
            }

            manager.delete_artifact(&artifact).await?;
            println!("✓ Deleted {}", artifact);
        }

        Commands::Download { artifact, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&artifact));
            let size = manager.download_artifact(&artifact, &output).await?;
            println!("✓ Downloaded {} to {} ({})", artifact, output.display(), format_bytes(size));
        }

        Commands::List => {
            let artifacts = manager.list_artifacts().await?;
            if artifacts.is_empty() {
                println!("No artifacts found in bucket '{}'", config.storage.bucket);
                return Ok(());
            }

            println!("{:<40} {:>12}  LOCATION", "ARTIFACT", "SIZE");
            for artifact in &artifacts {
                println!(
                    "{:<40} {:>12}  {}",
                    artifact.id,
                    format_bytes(artifact.size),
                    artifact.location
                );
            }
            println!("\nTotal: {} artifact(s)", artifacts.len());
        }

        Commands::Log { limit } => {
            let entries = manager.recent_audit(limit).await?;
            if entries.is_empty() {
                println!("Audit log is empty");
            }
            for entry in entries {
                let marker = if entry.escalate { "!" } else { " " };
                println!(
                    "{} {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    marker,
                    entry.message
                );
            }
        }

        Commands::Daemon => {
            let shutdown = CancellationToken::new();
            let handle = scheduler::start(config.schedule.as_ref(), manager, shutdown.clone())?
                .context("No [schedule] section in configuration, nothing to run")?;

            println!("Scheduler running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
            shutdown.cancel();
            let runs = handle.await.context("Scheduler task panicked")?;
            println!("Scheduler stopped after {} run(s)", runs);
        }

        Commands::Validate => print_validation(config),
    }

    Ok(())
}

/// Reporter for a manual run plus a console observer of its events
fn observe(progress: &ProgressChannel, kind: OperationKind) -> (OperationReporter, JoinHandle<()>) {
    let reporter = progress.reporter(kind);
    let mut subscription = progress.subscribe(reporter.id());

    let observer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if event.percentage == FAILED {
                eprintln!("[fail] {}", event.message);
            } else {
                eprintln!("[{:>3}%] {}", event.percentage, event.message);
            }
            if event.is_terminal() {
                break;
            }
        }
    });

    (reporter, observer)
}

fn confirm(prompt: &str) -> Result<bool> {
    Ok(dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

fn print_validation(config: &Config) {
    println!("Configuration is valid!");
    println!("Database: {}", config.database.identity());
    println!(
        "Storage: {:?} bucket '{}'",
        config.storage.storage_type, config.storage.bucket
    );
    match config.schedule {
        Some(ref schedule) => println!("Schedule: {} (UTC)", schedule.cron),
        None => println!("Schedule: none (manual backups only)"),
    }
    println!(
        "Notifications: {}",
        if config.notifications.discord_webhook_url.is_empty() { "disabled" } else { "discord" }
    );
}
