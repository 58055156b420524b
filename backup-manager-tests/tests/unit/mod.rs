//! Unit tests for pg-backup-manager
//!
//! Run with: `cargo test -p backup-manager-tests --test unit`

mod audit;
mod config;
mod storage;
