//! PostgreSQL client tool invocations
//!
//! Connection parameters travel as arguments, the password as PGPASSWORD
//! in the environment overlay.

use std::path::Path;

use super::artifact::is_valid_database_name;
use super::command::CommandSpec;
use crate::config::{read_secret, DatabaseConfig};
use crate::error::OperationError;

pub const DUMP_TOOL: &str = "pg_dump";
pub const RESTORE_TOOL: &str = "pg_restore";
pub const CREATEDB_TOOL: &str = "createdb";

/// Builds dump / restore / create-database commands for one server
#[derive(Debug, Clone)]
pub struct PgTools {
    database: DatabaseConfig,
    password: Option<String>,
}

impl PgTools {
    /// Read the password file (if any) once, up front
    pub fn from_config(database: &DatabaseConfig) -> std::io::Result<Self> {
        let password = database
            .password_file
            .as_deref()
            .map(read_secret)
            .transpose()?;
        Ok(Self::new(database.clone(), password))
    }

    pub fn new(database: DatabaseConfig, password: Option<String>) -> Self {
        Self { database, password }
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    fn tool(&self, name: &str) -> CommandSpec {
        let program = match self.database.bin_directory {
            Some(ref dir) => dir.join(name).display().to_string(),
            None => name.to_string(),
        };

        let spec = CommandSpec::new(program)
            .arg("--host")
            .arg(self.database.host.as_str())
            .arg("--port")
            .arg(self.database.port.to_string())
            .arg("--username")
            .arg(self.database.user.as_str())
            .arg("--no-password");

        match self.password {
            Some(ref password) => spec.env("PGPASSWORD", password.as_str()),
            None => spec,
        }
    }

    /// Dump the configured database to `output` in custom archive format
    pub fn dump(&self, output: &Path) -> CommandSpec {
        self.tool(DUMP_TOOL)
            .arg("--format=custom")
            .arg(format!("--file={}", output.display()))
            .arg(self.database.name.as_str())
    }

    /// Restore the archive at `input` into `target`
    pub fn restore(&self, input: &Path, target: &str) -> Result<CommandSpec, OperationError> {
        check_name(target)?;
        Ok(self
            .tool(RESTORE_TOOL)
            .arg(format!("--dbname={}", target))
            .arg("--clean")
            .arg("--if-exists")
            .arg("--no-owner")
            .arg(input.display().to_string()))
    }

    /// Create a new empty database
    pub fn create_database(&self, name: &str) -> Result<CommandSpec, OperationError> {
        check_name(name)?;
        Ok(self.tool(CREATEDB_TOOL).arg(name))
    }

    /// Tools that could not be resolved on this host
    pub fn missing_tools(&self) -> Vec<String> {
        [DUMP_TOOL, RESTORE_TOOL, CREATEDB_TOOL]
            .iter()
            .filter(|tool| {
                let found = match self.database.bin_directory {
                    Some(ref dir) => dir.join(tool).is_file(),
                    None => which::which(tool).is_ok(),
                };
                !found
            })
            .map(|tool| tool.to_string())
            .collect()
    }
}

fn check_name(name: &str) -> Result<(), OperationError> {
    if is_valid_database_name(name) {
        Ok(())
    } else {
        Err(OperationError::InvalidDatabaseName(name.to_string()))
    }
}
