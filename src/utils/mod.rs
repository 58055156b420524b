pub mod artifact;
pub mod command;
pub mod cron;
pub mod format;
pub mod locker;
pub mod postgres;

// Trait-based abstraction for testability
pub mod executor;

// Re-export commonly used types and traits (used by test crate)
pub use command::{CommandSpec, ProcessError};
pub use executor::{ProcessRunner, TokioProcessRunner};
