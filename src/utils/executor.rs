//! Command execution abstraction for testability
//!
//! This module provides a trait-based abstraction for command execution,
//! enabling dependency injection and mocking for tests.

use async_trait::async_trait;

use super::command::{CommandSpec, ProcessError};

/// Executes one external command; reports only success or failure
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<(), ProcessError>;
}

/// Default implementation using real subprocess calls
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<(), ProcessError> {
        super::command::run_command(spec).await
    }
}

/// A mock runner for testing that records calls and returns configured responses
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Response configuration for one program
    #[derive(Clone, Debug)]
    pub enum MockResponse {
        Success,
        /// Write this many bytes to the `--file=` argument, like a dump tool
        WriteFile { bytes: usize },
        Failure { stderr: String, exit_code: i32 },
    }

    /// Recorded invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub spec: CommandSpec,
        /// Size of the file named by the last argument, if it existed
        pub input_size: Option<u64>,
    }

    /// Mock runner for testing
    #[derive(Clone, Default)]
    pub struct MockProcessRunner {
        calls: Arc<Mutex<Vec<CommandCall>>>,
        responses: Arc<Mutex<HashMap<String, MockResponse>>>,
        delay: Arc<Mutex<Option<Duration>>>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    impl MockProcessRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Runner whose dump tool produces `bytes` bytes and everything else succeeds
        pub fn with_dump_size(bytes: usize) -> Self {
            Self::new().expect("pg_dump", MockResponse::WriteFile { bytes })
        }

        /// Configure a response for a program (matched on file name)
        pub fn expect(self, program: &str, response: MockResponse) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(program.to_string(), response);
            self
        }

        /// Make a program fail with the given exit code
        pub fn fail(self, program: &str, exit_code: i32, stderr: &str) -> Self {
            self.expect(
                program,
                MockResponse::Failure {
                    stderr: stderr.to_string(),
                    exit_code,
                },
            )
        }

        /// Hold every command for a while, to exercise concurrent runs
        pub fn with_delay(self, delay: Duration) -> Self {
            *self.delay.lock().unwrap() = Some(delay);
            self
        }

        pub fn get_calls(&self) -> Vec<CommandCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, program: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.spec.program_name() == program)
                .count()
        }

        pub fn calls_to(&self, program: &str) -> Vec<CommandCall> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.spec.program_name() == program)
                .cloned()
                .collect()
        }

        /// Highest number of commands observed running at once
        pub fn max_concurrent(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }

        fn record_call(&self, spec: &CommandSpec) {
            let input_size = spec
                .args
                .last()
                .and_then(|a| std::fs::metadata(a).ok())
                .filter(|m| m.is_file())
                .map(|m| m.len());
            self.calls.lock().unwrap().push(CommandCall {
                spec: spec.clone(),
                input_size,
            });
        }

        fn get_response(&self, spec: &CommandSpec) -> MockResponse {
            self.responses
                .lock()
                .unwrap()
                .get(spec.program_name())
                .cloned()
                .unwrap_or(MockResponse::Success)
        }
    }

    #[async_trait]
    impl ProcessRunner for MockProcessRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<(), ProcessError> {
            self.record_call(spec);

            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            match self.get_response(spec) {
                MockResponse::Success => Ok(()),
                MockResponse::WriteFile { bytes } => {
                    let path = spec
                        .args
                        .iter()
                        .find_map(|a| a.strip_prefix("--file="))
                        .unwrap_or_else(|| panic!("{} called without --file=", spec.program));
                    std::fs::write(path, vec![b'x'; bytes]).map_err(|source| {
                        ProcessError::Spawn {
                            program: spec.program.clone(),
                            source,
                        }
                    })
                }
                MockResponse::Failure { stderr, exit_code } => Err(ProcessError::Exit {
                    program: spec.program_name().to_string(),
                    code: Some(exit_code),
                    stderr,
                }),
            }
        }
    }
}
