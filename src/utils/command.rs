//! Utilities for running external commands with proper error handling
//!
//! Commands are always built as a program plus an argument list; nothing is
//! ever passed through a shell.

use std::collections::BTreeMap;
use std::process::Stdio;
use tracing::{debug, error};

/// A structured external command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Environment overlay on top of the inherited environment
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Program file name without any directory, e.g. `pg_dump`
    pub fn program_name(&self) -> &str {
        std::path::Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    /// Printable command line; environment values are never included
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed with exit code {code:?}: {stderr}")]
    Exit {
        program: String,
        /// None when the process was terminated by a signal
        code: Option<i32>,
        stderr: String,
    },
}

impl ProcessError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Exit { code, .. } => *code,
            ProcessError::Spawn { .. } => None,
        }
    }
}

/// Run a command to completion; success means exit code 0.
///
/// No timeout is imposed here, the tool's own defaults apply.
pub async fn run_command(spec: &CommandSpec) -> Result<(), ProcessError> {
    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.envs(&spec.env);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!("Running command: {}", spec.display());

    let output = cmd.output().await.map_err(|source| ProcessError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!("Command failed: {}", spec.display());
        error!("Stderr: {}", stderr);
        return Err(ProcessError::Exit {
            program: spec.program_name().to_string(),
            code: output.status.code(),
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
        debug!("Command output: {}", stdout);
    }

    Ok(())
}
