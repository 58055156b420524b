//! Test fixtures and sample data
//!
//! Provides config templates, sample identifiers and a recording progress
//! observer.

use parking_lot::Mutex;
use pg_backup_manager::managers::progress::{
    OperationId, ProgressChannel, ProgressEvent, COMPLETE, FAILED,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Minimal valid config TOML template
pub fn minimal_config_toml() -> &'static str {
    r#"
[global]
temp_directory = "{temp_dir}"
log_directory = "{log_dir}"

[database]
user = "postgres"
name = "appdb"
password_file = "{password_file}"

[storage]
type = "local"
bucket = "backups"
path = "{storage_path}"

[audit]
path = "{audit_path}"
"#
}

/// Config with every optional section filled in
pub fn full_config_toml() -> &'static str {
    r#"
[global]
temp_directory = "{temp_dir}"
artifact_prefix = "nightly"
serialize_operations = false
log_directory = "{log_dir}"
log_level = "debug"
log_format = "json"
log_max_files = 3

[database]
host = "db.internal"
port = 6543
user = "backup"
name = "orders"
password_file = "{password_file}"
bin_directory = "/usr/lib/postgresql/16/bin"

[storage]
type = "s3"
bucket = "pg-backups"
endpoint = "https://s3.example.com"
region = "eu-central-1"

[audit]
path = "{audit_path}"
display_limit = 20

[notifications]
discord_webhook_url = "https://discord.com/api/webhooks/test"

[schedule]
cron = "30 2 * * *"
"#
}

/// Replace `{name}` placeholders in a template
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

/// Identifiers the way backups name them, oldest first
pub fn sample_artifact_ids(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("backup-202610{:02}-020000.dump", i + 1))
        .collect()
}

/// Audit log lines in the on-disk format, oldest first
pub fn sample_audit_lines() -> Vec<&'static str> {
    vec![
        "2026-10-14T02:00:03Z INFO Backup backup-20261014-020000.dump completed (1.0 KB)",
        "2026-10-15T02:00:02Z ESCALATED Backup backup-20261015-020000.dump failed: pg_dump exited with code 1",
        "2026-10-15T09:12:44Z ESCALATED Restore of backup-20261014-020000.dump into 'appdb' completed",
    ]
}

/// Observer that opted in to every progress event and records them
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
    task: JoinHandle<()>,
}

impl RecordingObserver {
    /// Subscribe to all operations on `channel`
    pub fn attach(channel: &ProgressChannel) -> Self {
        let mut subscription = channel.subscribe_all();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                sink.lock().push(event);
            }
        });
        Self { events, task }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, operation: OperationId) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.operation == operation)
            .cloned()
            .collect()
    }

    pub fn percentages_for(&self, operation: OperationId) -> Vec<i32> {
        self.events_for(operation).iter().map(|e| e.percentage).collect()
    }

    /// Wait until `count` terminal events were observed
    pub async fn wait_for_terminals(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let seen = self.events.lock().iter().filter(|e| e.is_terminal()).count();
            if seen >= count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "Timed out waiting for {} terminal events, saw {}",
                count,
                seen
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for RecordingObserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Assert the per-operation percentage contract: non-decreasing values in
/// [0, 99], then exactly one terminal value (100 or -1) and nothing after.
pub fn assert_progress_invariant(percentages: &[i32]) {
    let (terminal, body) = percentages
        .split_last()
        .unwrap_or_else(|| panic!("No progress events recorded"));

    assert!(
        *terminal == COMPLETE || *terminal == FAILED,
        "Last event {} is not terminal in {:?}",
        terminal,
        percentages
    );
    assert!(
        body.iter().all(|p| (0..COMPLETE).contains(p)),
        "Non-terminal value out of range in {:?}",
        percentages
    );
    assert!(
        body.windows(2).all(|w| w[0] <= w[1]),
        "Percentages decrease in {:?}",
        percentages
    );
}
