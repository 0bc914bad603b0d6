//! SQL execution against the bootstrap socket.

use std::io::Read;
use std::path::PathBuf;
use std::process::Stdio;

use secrecy::SecretString;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use super::passfile::CredentialFile;
use crate::environment::Environment;
use crate::error::{InitError, InitResult};

/// Per-batch execution options.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Include the root password in the credential file.
    pub use_root_password: bool,
    /// Database that overrides the session default.
    pub force_database: Option<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            use_root_password: true,
            force_database: None,
        }
    }
}

impl ExecOptions {
    /// Run against `database` without the root password; used while root
    /// credentials are still being established.
    #[must_use]
    pub fn bootstrap(database: impl Into<String>) -> Self {
        Self {
            use_root_password: false,
            force_database: Some(database.into()),
        }
    }

    /// Run against `database` with the root password.
    #[must_use]
    pub fn in_database(database: impl Into<String>) -> Self {
        Self {
            use_root_password: true,
            force_database: Some(database.into()),
        }
    }
}

/// Runs statement batches through the engine client as root over the
/// bootstrap socket.
///
/// Each call is one client process and therefore one administrative batch.
#[derive(Debug)]
pub struct SqlSession {
    client: PathBuf,
    socket: PathBuf,
    root_password: Option<SecretString>,
    default_database: Option<String>,
}

impl SqlSession {
    /// Create a session.
    pub fn new(client: impl Into<PathBuf>, socket: impl Into<PathBuf>) -> Self {
        Self {
            client: client.into(),
            socket: socket.into(),
            root_password: None,
            default_database: None,
        }
    }

    /// Set the root password used when [`ExecOptions::use_root_password`] is set.
    #[must_use]
    pub fn with_root_password(mut self, password: Option<SecretString>) -> Self {
        self.root_password = password;
        self
    }

    /// Set the database batches run in unless forced elsewhere.
    #[must_use]
    pub fn with_default_database(mut self, database: Option<String>) -> Self {
        self.default_database = database;
        self
    }

    /// Replace the root password, e.g. once it has been generated.
    pub fn set_root_password(&mut self, password: Option<SecretString>) {
        self.root_password = password;
    }

    /// The root password, if one is known.
    #[must_use]
    pub fn root_password(&self) -> Option<&SecretString> {
        self.root_password.as_ref()
    }

    /// Client arguments for one batch.
    fn args(&self, credentials: &CredentialFile, opts: &ExecOptions) -> Vec<String> {
        let mut args = vec![
            credentials.arg(),
            "--protocol=socket".to_owned(),
            "-uroot".to_owned(),
            "-hlocalhost".to_owned(),
            format!("--socket={}", self.socket.display()),
            "--comments".to_owned(),
        ];
        // Later --database options win, so the forced one goes last.
        if let Some(database) = &self.default_database {
            args.push(format!("--database={database}"));
        }
        if let Some(database) = &opts.force_database {
            args.push(format!("--database={database}"));
        }
        args
    }

    /// Execute a statement batch.
    pub async fn exec(
        &self,
        env: &Environment,
        step: &str,
        sql: &str,
        opts: &ExecOptions,
    ) -> InitResult<()> {
        let sql = sql.as_bytes().to_vec();
        self.run(env, opts, step, |mut stdin: ChildStdin| async move {
            stdin.write_all(&sql).await?;
            stdin.shutdown().await
        })
        .await
    }

    /// Stream a statement batch from a blocking reader.
    ///
    /// The reader runs on a blocking task so decompressors can feed the
    /// client without buffering the whole input.
    pub async fn exec_reader<R>(
        &self,
        env: &Environment,
        reader: R,
        opts: &ExecOptions,
        step: &str,
    ) -> InitResult<()>
    where
        R: Read + Send + 'static,
    {
        self.run(env, opts, step, |stdin: ChildStdin| async move {
            tokio::task::spawn_blocking(move || {
                let mut reader = reader;
                let mut bridge = SyncIoBridge::new(stdin);
                std::io::copy(&mut reader, &mut bridge)?;
                bridge.shutdown()
            })
            .await
            .map_err(std::io::Error::other)?
        })
        .await
    }

    async fn run<F, Fut>(
        &self,
        env: &Environment,
        opts: &ExecOptions,
        step: &str,
        feed: F,
    ) -> InitResult<()>
    where
        F: FnOnce(ChildStdin) -> Fut,
        Fut: std::future::Future<Output = std::io::Result<()>>,
    {
        let password = if opts.use_root_password {
            self.root_password.as_ref()
        } else {
            None
        };
        let credentials = CredentialFile::new(password)?;

        debug!(
            step,
            database = opts
                .force_database
                .as_deref()
                .or(self.default_database.as_deref()),
            with_password = password.is_some(),
            "executing sql"
        );

        let mut child = super::command(&self.client, env)
            .args(self.args(&credentials, opts))
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| InitError::Spawn {
                program: self.client.display().to_string(),
                source,
            })?;
        drop(credentials);

        let fed = match child.stdin.take() {
            Some(stdin) => feed(stdin).await,
            None => Ok(()),
        };

        let status = child.wait().await?;
        if !status.success() {
            return Err(InitError::provisioning(step, format!("client exited with {status}")));
        }
        fed.map_err(|e| InitError::provisioning(step, format!("failed to stream sql: {e}")))
    }
}
