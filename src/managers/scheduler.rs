//! Unattended backups on a recurring trigger
//!
//! Scheduled runs have no progress observer; their outcome is only visible
//! in the audit log (failures escalated).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::backup::BackupManager;
use crate::config::ScheduleConfig;
use crate::utils::cron::{CronError, CronSchedule};

/// Source of trigger instants
#[async_trait]
pub trait TriggerSource: Send {
    /// Wait for the next trigger; None once no more triggers will come
    async fn next_trigger(&mut self) -> Option<DateTime<Utc>>;
}

/// Fires at every match of a cron expression (UTC)
pub struct CronTrigger {
    schedule: CronSchedule,
    /// Last instant that fired; a clock running behind never repeats it
    last_fired: Option<DateTime<Utc>>,
}

impl CronTrigger {
    pub fn new(schedule: CronSchedule) -> Self {
        Self {
            schedule,
            last_fired: None,
        }
    }

    /// Next match strictly after both `now` and the last fired instant
    fn next_instant(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = match self.last_fired {
            Some(last) if last > now => last,
            _ => now,
        };
        self.schedule.next_after(from)
    }
}

#[async_trait]
impl TriggerSource for CronTrigger {
    async fn next_trigger(&mut self) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let next = self.next_instant(now)?;
        debug!("Next scheduled backup at {}", next);

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        self.last_fired = Some(next);
        Some(next)
    }
}

/// Fires whenever the paired sender sends; exhausted when it is dropped
pub struct ChannelTrigger {
    receiver: mpsc::Receiver<()>,
}

impl ChannelTrigger {
    pub fn new(buffer: usize) -> (mpsc::Sender<()>, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        (sender, Self { receiver })
    }
}

#[async_trait]
impl TriggerSource for ChannelTrigger {
    async fn next_trigger(&mut self) -> Option<DateTime<Utc>> {
        self.receiver.recv().await.map(|()| Utc::now())
    }
}

pub struct Scheduler<S> {
    source: S,
    manager: Arc<BackupManager>,
    runs: TaskTracker,
    shutdown: CancellationToken,
}

impl<S: TriggerSource> Scheduler<S> {
    pub fn new(source: S, manager: Arc<BackupManager>) -> Self {
        Self {
            source,
            manager,
            runs: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Start a backup for every trigger until the source is exhausted or
    /// shutdown is requested, then wait for runs still in flight. Returns
    /// the number of runs started.
    pub async fn run(mut self) -> usize {
        let mut started = 0;

        loop {
            let trigger = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
                trigger = self.source.next_trigger() => trigger,
            };
            let Some(at) = trigger else {
                debug!("Trigger source exhausted");
                break;
            };

            info!("Scheduled backup triggered ({})", at.format("%Y-%m-%d %H:%M:%S UTC"));
            let manager = self.manager.clone();
            self.runs.spawn(async move {
                // Outcome is logged and audited by the manager
                let _ = manager.backup(None).await;
            });
            started += 1;
        }

        self.runs.close();
        if !self.runs.is_empty() {
            info!("Waiting for {} scheduled backup(s) to finish", self.runs.len());
        }
        self.runs.wait().await;
        started
    }
}

/// Spawn the cron scheduler if a schedule is configured
pub fn start(
    schedule: Option<&ScheduleConfig>,
    manager: Arc<BackupManager>,
    shutdown: CancellationToken,
) -> Result<Option<JoinHandle<usize>>, CronError> {
    let Some(schedule) = schedule else {
        info!("No schedule configured, automatic backups disabled");
        return Ok(None);
    };

    let cron = CronSchedule::parse(&schedule.cron)?;
    info!("Scheduling backups: {} (UTC)", cron);
    let scheduler = Scheduler::new(CronTrigger::new(cron), manager).with_shutdown(shutdown);
    Ok(Some(tokio::spawn(scheduler.run())))
}
