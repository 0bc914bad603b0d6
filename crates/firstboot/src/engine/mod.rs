//! Subprocess boundary to the database engine.
//!
//! Everything the orchestrator knows about the engine comes from running its
//! binaries: the server in report mode, bootstrap mode and daemonized mode,
//! the SQL client, and the administrative client.

mod passfile;
mod resolver;
mod server;
mod session;

pub use passfile::CredentialFile;
pub use resolver::{AuxPathRole, ConfigResolver, EngineReport, RuntimeConfig};
pub use server::{initialize_data_dir, ServerState, TempServer};
pub use session::{ExecOptions, SqlSession};

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::Command;

use crate::environment::Environment;

/// The server program plus the operator's arguments.
///
/// Every engine invocation starts from this argument list so that config
/// files named on the command line are honoured consistently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    program: String,
    args: Vec<String>,
}

impl ServerCommand {
    /// Create a server command.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The server program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The operator's arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Same program and arguments with `extra` appended.
    #[must_use]
    pub fn with_args<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = self.args.clone();
        args.extend(extra.into_iter().map(Into::into));
        Self {
            program: self.program.clone(),
            args,
        }
    }

    /// Build a command with the given environment and no stdin.
    #[must_use]
    pub fn command(&self, env: &Environment) -> Command {
        let mut cmd = command(&self.program, env);
        cmd.args(&self.args);
        cmd
    }

    /// Render the command line for diagnostics.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build a command that sees exactly `env`.
pub(crate) fn command(program: impl AsRef<OsStr>, env: &Environment) -> Command {
    let mut cmd = Command::new(program);
    cmd.env_clear().envs(env.iter()).stdin(Stdio::null());
    cmd
}
