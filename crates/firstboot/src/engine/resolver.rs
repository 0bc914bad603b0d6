//! Runtime configuration from the engine's own report.
//!
//! Rather than parsing option files, the server is asked to print its
//! effective settings (`--verbose --help`) with the operator's arguments, so
//! every include, override and default is resolved by the engine itself.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use tracing::{debug, instrument};

use super::ServerCommand;
use crate::environment::Environment;
use crate::error::{InitError, InitResult};

/// Auxiliary paths the engine may write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuxPathRole {
    /// General query log file.
    GeneralLog,
    /// Keyring data file.
    KeyringData,
    /// Server pid file.
    PidFile,
    /// `LOAD DATA`/`SELECT INTO OUTFILE` directory.
    SecureFilePriv,
    /// Slow query log file.
    SlowQueryLog,
}

impl AuxPathRole {
    /// All roles, in report order.
    pub const ALL: [Self; 5] = [
        Self::GeneralLog,
        Self::KeyringData,
        Self::PidFile,
        Self::SecureFilePriv,
        Self::SlowQueryLog,
    ];

    /// Key under which the engine reports this path.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::GeneralLog => "general-log-file",
            Self::KeyringData => "keyring_file_data",
            Self::PidFile => "pid-file",
            Self::SecureFilePriv => "secure-file-priv",
            Self::SlowQueryLog => "slow-query-log-file",
        }
    }

    /// Whether the reported value is a directory rather than a file.
    #[must_use]
    pub const fn is_directory(self) -> bool {
        matches!(self, Self::SecureFilePriv)
    }
}

/// Effective engine settings for this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Server socket.
    pub socket: PathBuf,
    /// Auxiliary paths that are configured.
    pub aux_paths: BTreeMap<AuxPathRole, PathBuf>,
}

impl RuntimeConfig {
    /// Build from a parsed report.
    ///
    /// Fails if the data directory or socket is missing.
    pub fn from_report(report: &EngineReport) -> InitResult<Self> {
        let required = |key: &str| -> InitResult<PathBuf> {
            report
                .get(key)
                .map(PathBuf::from)
                .ok_or_else(|| InitError::MissingSetting(key.to_owned()))
        };

        let aux_paths = AuxPathRole::ALL
            .into_iter()
            .filter_map(|role| report.get(role.key()).map(|v| (role, PathBuf::from(v))))
            .collect();

        Ok(Self {
            data_dir: required("datadir")?,
            socket: required("socket")?,
            aux_paths,
        })
    }

    /// Whether the engine's system schema already exists in the data dir.
    #[must_use]
    pub fn has_system_schema(&self, schema: &str) -> bool {
        self.data_dir.join(schema).is_dir()
    }
}

/// Parsed `--verbose --help` report.
///
/// Only lines starting in the first column are considered; the key is the
/// first token and the value is the rest of the line. The first occurrence
/// of a key wins. Empty values and `NULL` are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReport {
    values: BTreeMap<String, String>,
}

impl EngineReport {
    /// Parse report text.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            if line.starts_with(|c: char| c.is_whitespace()) {
                continue;
            }
            let mut parts = line.splitn(2, |c: char| c == ' ' || c == '\t');
            let Some(key) = parts.next().filter(|k| !k.is_empty()) else {
                continue;
            };
            let value = parts.next().unwrap_or("").trim();
            values
                .entry(key.to_owned())
                .or_insert_with(|| value.to_owned());
        }
        Self { values }
    }

    /// Look up a configured value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty() && *v != "NULL")
    }
}

/// Queries the server binary for its effective configuration.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    server: ServerCommand,
    env: Environment,
}

impl ConfigResolver {
    /// Create a resolver for the given server command.
    pub fn new(server: ServerCommand, env: Environment) -> Self {
        Self { server, env }
    }

    /// Run the report with the full argument list and fail if the engine
    /// rejects it.
    ///
    /// This catches malformed configuration before anything on disk changes.
    pub async fn check(&self) -> InitResult<EngineReport> {
        self.report().await
    }

    /// Check the configuration and resolve the runtime paths from it.
    pub async fn resolve(&self) -> InitResult<RuntimeConfig> {
        RuntimeConfig::from_report(&self.check().await?)
    }

    /// Look up a single configuration value.
    pub async fn get_config_value(&self, key: &str) -> InitResult<Option<String>> {
        Ok(self.report().await?.get(key).map(str::to_owned))
    }

    /// The socket the engine would use with no option files at all.
    pub async fn default_socket(&self) -> InitResult<Option<PathBuf>> {
        let bare = Self::new(
            ServerCommand::new(self.server.program(), vec!["--no-defaults".to_owned()]),
            self.env.clone(),
        );
        Ok(bare.get_config_value("socket").await?.map(PathBuf::from))
    }

    #[instrument(skip(self), fields(program = %self.server.program()))]
    async fn report(&self) -> InitResult<EngineReport> {
        let cmd = self.server.with_args([
            "--verbose".to_owned(),
            "--help".to_owned(),
            format!("--log-bin-index={}", placeholder_path().display()),
        ]);

        debug!(command = %cmd.display(), "querying engine configuration");

        let output = cmd
            .command(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| InitError::Spawn {
                program: self.server.program().to_owned(),
                source,
            })?;

        if !output.status.success() {
            return Err(InitError::ConfigRejected {
                program: self.server.program().to_owned(),
                command: cmd.display(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
            });
        }

        Ok(EngineReport::parse(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// A unique path that does not exist, so the report never touches a real
/// binlog index.
fn placeholder_path() -> PathBuf {
    std::env::temp_dir().join(format!("firstboot-{}", uuid::Uuid::new_v4()))
}
