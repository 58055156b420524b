//! Test utilities for pg-backup-manager
//!
//! This crate provides shared test utilities, mock implementations,
//! and helper functions for testing the pg-backup-manager application.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, MockProcessRunner, TestContext};
//!
//! #[tokio::test]
//! async fn my_test() {
//!     let ctx = TestContext::from_builder(ConfigBuilder::minimal());
//!     let manager = ctx.manager(MockProcessRunner::with_dump_size(1000));
//!     let artifact = manager.backup(None).await.unwrap();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod faulty_storage;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use faulty_storage::FaultyStorage;
pub use fixtures::*;
pub use test_context::TestContext;

// Re-export types from the main crate for convenience
pub use pg_backup_manager::config::{
    AuditConfig, Config, DatabaseConfig, GlobalConfig, LogFormat, NotificationConfig,
    ScheduleConfig, StorageConfig, StorageType,
};
pub use pg_backup_manager::managers::progress::{
    OperationKind, ProgressChannel, ProgressEvent, COMPLETE, FAILED,
};
pub use pg_backup_manager::utils::artifact::{Artifact, ArtifactId};
pub use pg_backup_manager::BackupManager;

// Re-export mock implementations from the main crate
pub use pg_backup_manager::utils::executor::mock::{CommandCall, MockProcessRunner, MockResponse};
pub use pg_backup_manager::utils::executor::ProcessRunner;

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;
