//! Live progress of running operations
//!
//! Events are fire-and-forget: nothing is persisted or replayed, and an
//! observer that falls behind simply misses events. Observers subscribe to
//! one operation, or opt in to every event of every operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Name of the single event type on the wire
pub const PROGRESS_EVENT: &str = "progress";

/// Terminal percentage of a failed operation
pub const FAILED: i32 = -1;

/// Terminal percentage of a completed operation
pub const COMPLETE: i32 = 100;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Backup,
    Restore,
    DisasterRecovery,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Backup => "backup",
            OperationKind::Restore => "restore",
            OperationKind::DisasterRecovery => "disaster recovery",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub operation: OperationId,
    pub kind: OperationKind,
    pub message: String,
    /// 0-100, or -1 for failure
    pub percentage: i32,
}

/// What observers receive on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub message: String,
    pub percentage: i32,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.percentage == COMPLETE || self.percentage == FAILED
    }

    pub fn payload(&self) -> ProgressPayload {
        ProgressPayload {
            message: self.message.clone(),
            percentage: self.percentage,
        }
    }

    /// JSON body of the `progress` event
    pub fn to_wire_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload())
    }
}

/// Publish/subscribe hub for progress events
#[derive(Clone)]
pub struct ProgressChannel {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Deliver to whoever is listening right now; no listeners is fine
    pub fn publish(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            debug!("No progress observers connected");
        }
    }

    /// Events of one operation only
    pub fn subscribe(&self, operation: OperationId) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter: Some(operation),
        }
    }

    /// Every event of every operation
    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter: None,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Reporter for a new operation publishing on this channel
    pub fn reporter(&self, kind: OperationKind) -> OperationReporter {
        OperationReporter::new(kind, Some(self.clone()))
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<ProgressEvent>,
    filter: Option<OperationId>,
}

impl Subscription {
    /// Next matching event; None once the channel is gone
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.map_or(true, |id| id == event.operation) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Progress observer fell behind, skipped {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Collect events until the operation's terminal event
    pub async fn until_terminal(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let done = event.is_terminal() && self.filter.is_some();
            events.push(event);
            if done {
                break;
            }
        }
        events
    }
}

/// Emits the events of one operation.
///
/// Non-terminal percentages never decrease and stay below 100; exactly one
/// terminal event is emitted and nothing after it.
pub struct OperationReporter {
    id: OperationId,
    kind: OperationKind,
    channel: Option<ProgressChannel>,
    last: i32,
    finished: bool,
}

impl OperationReporter {
    fn new(kind: OperationKind, channel: Option<ProgressChannel>) -> Self {
        Self {
            id: OperationId::next(),
            kind,
            channel,
            last: 0,
            finished: false,
        }
    }

    /// Reporter with no observers attached (scheduled runs)
    pub fn silent(kind: OperationKind) -> Self {
        Self::new(kind, None)
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn last_percentage(&self) -> i32 {
        self.last
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn emit(&mut self, message: String, percentage: i32) {
        self.last = percentage;
        if let Some(ref channel) = self.channel {
            channel.publish(ProgressEvent {
                operation: self.id,
                kind: self.kind,
                message,
                percentage,
            });
        }
    }

    pub fn progress(&mut self, message: impl Into<String>, percentage: i32) {
        if self.finished {
            return;
        }
        let percentage = percentage.clamp(self.last, COMPLETE - 1);
        self.emit(message.into(), percentage);
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.emit(message.into(), COMPLETE);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.emit(message.into(), FAILED);
    }
}

/// Rescale a raw transfer ratio into the phase's percentage sub-range
pub fn scale_progress(ratio: f64, start: i32, end: i32) -> i32 {
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
    start + ((end - start) as f64 * ratio).floor() as i32
}
