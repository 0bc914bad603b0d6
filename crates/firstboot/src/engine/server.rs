//! Temporary bootstrap server lifecycle.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use secrecy::SecretString;
use tracing::{debug, info, instrument};

use super::passfile::CredentialFile;
use super::ServerCommand;
use crate::environment::Environment;
use crate::error::{InitError, InitResult};

/// Lifecycle of the temporary server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not launched yet.
    NotRunning,
    /// Launch issued.
    Starting,
    /// Launch returned success.
    Running,
    /// Shutdown issued.
    Stopping,
    /// Shutdown returned success.
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRunning => write!(f, "not-running"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Create the system schema in an empty data directory.
#[instrument(skip_all, fields(program = %server.program()))]
pub async fn initialize_data_dir(server: &ServerCommand, env: &Environment) -> InitResult<()> {
    info!("Initializing database files");

    let cmd = server.with_args(["--initialize-insecure", "--default-time-zone=SYSTEM"]);
    let status = cmd
        .command(env)
        .status()
        .await
        .map_err(|source| InitError::Spawn {
            program: server.program().to_owned(),
            source,
        })?;

    if !status.success() {
        return Err(InitError::InitializeFailed(format!(
            "{} exited with {status}",
            cmd.display()
        )));
    }

    info!("Database files initialized");
    Ok(())
}

/// Handle to the daemonized, socket-only bootstrap server.
///
/// [`TempServer::stop`] consumes the handle, so a bootstrap has exactly one
/// start/stop pair.
#[derive(Debug)]
pub struct TempServer {
    socket: PathBuf,
    admin: PathBuf,
    state: ServerState,
}

impl TempServer {
    /// Launch the server with networking disabled, bound to `socket`.
    ///
    /// The engine backgrounds itself, so a successful exit of the launch
    /// command means it is accepting connections; there is no further
    /// polling.
    #[instrument(skip_all, fields(socket = %socket.display()))]
    pub async fn start(
        server: &ServerCommand,
        socket: &Path,
        admin: impl Into<PathBuf>,
        env: &Environment,
    ) -> InitResult<Self> {
        let mut handle = Self {
            socket: socket.to_owned(),
            admin: admin.into(),
            state: ServerState::NotRunning,
        };

        let cmd = server.with_args([
            "--daemonize".to_owned(),
            "--skip-networking".to_owned(),
            "--default-time-zone=SYSTEM".to_owned(),
            format!("--socket={}", socket.display()),
        ]);

        handle.transition(ServerState::Starting);
        let status = cmd
            .command(env)
            .status()
            .await
            .map_err(|source| InitError::Spawn {
                program: server.program().to_owned(),
                source,
            })?;

        if !status.success() {
            return Err(InitError::ServerStart(format!(
                "{} exited with {status}",
                cmd.display()
            )));
        }

        handle.transition(ServerState::Running);
        Ok(handle)
    }

    /// The socket the server listens on.
    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Shut the server down over its socket as root.
    pub async fn stop(
        mut self,
        root_password: Option<&SecretString>,
        env: &Environment,
    ) -> InitResult<ServerState> {
        self.transition(ServerState::Stopping);

        let credentials = CredentialFile::new(root_password)?;
        let mut child = super::command(&self.admin, env)
            .arg(credentials.arg())
            .arg("shutdown")
            .arg("-uroot")
            .arg(format!("--socket={}", self.socket.display()))
            .stdout(Stdio::inherit())
            .spawn()
            .map_err(|source| InitError::Spawn {
                program: self.admin.display().to_string(),
                source,
            })?;
        drop(credentials);

        let status = child.wait().await?;
        if !status.success() {
            return Err(InitError::ServerStop(format!(
                "{} exited with {status}",
                self.admin.display()
            )));
        }

        self.transition(ServerState::Stopped);
        Ok(self.state)
    }

    fn transition(&mut self, next: ServerState) {
        debug!(from = %self.state, to = %next, "temporary server state");
        self.state = next;
    }
}
