//! PG Backup Manager Library
//!
//! Backup, restore and disaster-recovery orchestration for one PostgreSQL
//! database, with artifacts kept in an object store.

pub mod config;
pub mod error;
pub mod managers;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, Config};
pub use error::OperationError;
pub use managers::audit::{AuditEntry, AuditLog};
pub use managers::backup::BackupManager;
pub use managers::logging::{init_logging, LogGuard, LoggingConfig};
pub use managers::notification::{DiscordNotifier, Notifier, Outcome};
pub use managers::progress::{OperationKind, OperationReporter, ProgressChannel, ProgressEvent};
pub use storage::StorageClient;
pub use utils::artifact::{Artifact, ArtifactId};
