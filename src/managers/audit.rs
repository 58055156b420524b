//! Append-only audit log with escalation
//!
//! One line per entry: `<rfc3339 timestamp> <INFO|ESCALATED> <message>`.
//! Appends take an exclusive file lock so that a daemon and a manual CLI
//! invocation can share the same log.

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::notification::{Notifier, Outcome};

const ESCALATED: &str = "ESCALATED";
const ROUTINE: &str = "INFO";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub escalate: bool,
}

impl AuditEntry {
    fn to_line(&self) -> String {
        format!(
            "{} {} {}\n",
            self.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            if self.escalate { ESCALATED } else { ROUTINE },
            self.message
        )
    }

    fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, ' ');
        let timestamp = DateTime::parse_from_rfc3339(parts.next()?).ok()?;
        let escalate = match parts.next()? {
            ESCALATED => true,
            ROUTINE => false,
            _ => return None,
        };
        Some(Self {
            timestamp: timestamp.with_timezone(&Utc),
            message: parts.next().unwrap_or_default().to_string(),
            escalate,
        })
    }
}

pub struct AuditLog {
    path: PathBuf,
    display_limit: usize,
    notifier: Option<Arc<dyn Notifier>>,
    escalations: TaskTracker,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, display_limit: usize) -> Self {
        Self {
            path: path.into(),
            display_limit,
            notifier: None,
            escalations: TaskTracker::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry; escalated entries are also handed to the notifier
    /// in the background, together with the outcome they report.
    pub async fn record(
        &self,
        message: impl Into<String>,
        escalate: bool,
        outcome: Outcome,
    ) -> std::io::Result<AuditEntry> {
        // One entry per line
        let message = message.into().replace(['\r', '\n'], " ");
        let entry = AuditEntry {
            timestamp: Utc::now(),
            message,
            escalate,
        };

        let path = self.path.clone();
        let line = entry.to_line();
        let written = tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e))
            .and_then(|result| result);

        if escalate {
            self.escalate(entry.message.clone(), outcome);
        }

        written?;
        debug!("Audit entry recorded: {}", entry.message);
        Ok(entry)
    }

    fn escalate(&self, message: String, outcome: Outcome) {
        let Some(notifier) = self.notifier.clone() else {
            debug!("No notifier configured, escalation only recorded locally");
            return;
        };

        self.escalations.spawn(async move {
            match notifier.notify(&message, outcome).await {
                Ok(()) => info!("Escalated: {}", message),
                Err(e) => warn!("Failed to deliver escalation: {}", e),
            }
        });
    }

    /// Wait until every escalation handed out so far was delivered or failed
    pub async fn wait_for_escalations(&self) {
        self.escalations.close();
        self.escalations.wait().await;
        self.escalations.reopen();
    }

    /// The most recent `limit` entries (configured limit if None), newest first
    pub async fn recent(&self, limit: Option<usize>) -> std::io::Result<Vec<AuditEntry>> {
        let limit = limit.unwrap_or(self.display_limit).min(self.display_limit.max(1));
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(content
            .lines()
            .filter_map(|line| {
                let entry = AuditEntry::parse_line(line);
                if entry.is_none() && !line.is_empty() {
                    debug!("Skipping malformed audit line: {}", line);
                }
                entry
            })
            .rev()
            .take(limit)
            .collect())
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut lock = RwLock::new(file);
    let mut guard = lock.write()?;
    guard.write_all(line.as_bytes())?;
    guard.flush()
}
