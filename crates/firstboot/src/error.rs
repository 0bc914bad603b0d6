//! Error types for the first-boot orchestrator.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a failure, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The engine rejected its arguments or reported unusable settings.
    Configuration,
    /// The credential environment is contradictory or insufficient.
    Policy,
    /// The temporary server could not be initialized, started or stopped.
    Bootstrap,
    /// An administrative statement batch or init artifact failed.
    Provisioning,
    /// Filesystem or process plumbing failed.
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Policy => write!(f, "policy"),
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// Errors that abort the entrypoint.
///
/// Every variant is fatal; nothing in the orchestrator retries.
#[derive(Debug, Error)]
pub enum InitError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The engine exited non-zero while reporting its configuration.
    #[error("{program} failed while attempting to check config\n\tcommand was: {command}\n\t{stderr}")]
    ConfigRejected {
        /// Engine binary.
        program: String,
        /// Full command line.
        command: String,
        /// Captured stderr, verbatim.
        stderr: String,
    },

    /// A required setting was absent from the engine report.
    #[error("engine did not report a value for `{0}`")]
    MissingSetting(String),

    /// An external program could not be spawned at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name or path.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Orchestrator settings could not be loaded.
    #[error("failed to load settings: {0}")]
    Settings(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Policy errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Both a variable and its `_FILE` counterpart are present.
    #[error("both {var} and {file_var} are set (but are exclusive)")]
    AmbiguousVariable {
        /// Direct variable name.
        var: String,
        /// File-indirected variable name.
        file_var: String,
    },

    /// A `_FILE` variable points at a file that cannot be read.
    #[error("failed to read {file_var} from {path}: {source}")]
    CredentialFile {
        /// File-indirected variable name.
        file_var: String,
        /// Path it names.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// None of the root password options is set on an uninitialized volume.
    #[error(
        "database is uninitialized and password option is not specified\n\
         \tYou need to specify one of the following as an environment variable:\n\
         \t- MYSQL_ROOT_PASSWORD\n\
         \t- MYSQL_ALLOW_EMPTY_PASSWORD\n\
         \t- MYSQL_RANDOM_ROOT_PASSWORD"
    )]
    MissingRootPassword,

    /// More than one root password option is set.
    #[error("conflicting root password options: {} (specify exactly one)", options.join(", "))]
    ConflictingRootPassword {
        /// Variables that were set.
        options: Vec<String>,
    },

    /// `MYSQL_USER` names the root account.
    #[error(
        "MYSQL_USER=\"root\", MYSQL_USER and MYSQL_PASSWORD are for configuring a regular user \
         and cannot be used for the root user"
    )]
    RootUser,

    /// The service account does not exist.
    #[error("unknown service account: {0}")]
    UnknownUser(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Bootstrap errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Data directory initialization failed.
    #[error("failed to initialize database files: {0}")]
    InitializeFailed(String),

    /// The temporary server did not start.
    #[error("unable to start server: {0}")]
    ServerStart(String),

    /// The temporary server did not shut down.
    #[error("unable to shut down server: {0}")]
    ServerStop(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Provisioning errors
    // ─────────────────────────────────────────────────────────────────────────
    /// An administrative statement batch failed.
    #[error("provisioning step '{step}' failed: {message}")]
    Provisioning {
        /// Step label.
        step: String,
        /// Failure description.
        message: String,
    },

    /// An init artifact failed.
    #[error("init script {path} failed: {message}")]
    ScriptFailed {
        /// Artifact path.
        path: PathBuf,
        /// Failure description.
        message: String,
    },

    /// The init directory exists but cannot be listed.
    #[error("cannot read init directory {path}: {source}")]
    InitDirUnreadable {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A directory could not be created or re-owned.
    #[error("failed to prepare {path}: {source}")]
    Directory {
        /// Path being prepared.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The final exec failed.
    #[error("failed to exec {program}: {source}")]
    Exec {
        /// Program being exec'd.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl InitError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigRejected { .. }
            | Self::MissingSetting(_)
            | Self::Spawn { .. }
            | Self::Settings(_) => ErrorKind::Configuration,
            Self::AmbiguousVariable { .. }
            | Self::CredentialFile { .. }
            | Self::MissingRootPassword
            | Self::ConflictingRootPassword { .. }
            | Self::RootUser
            | Self::UnknownUser(_) => ErrorKind::Policy,
            Self::InitializeFailed(_) | Self::ServerStart(_) | Self::ServerStop(_) => {
                ErrorKind::Bootstrap
            }
            Self::Provisioning { .. } | Self::ScriptFailed { .. } | Self::InitDirUnreadable { .. } => {
                ErrorKind::Provisioning
            }
            Self::Directory { .. } | Self::Exec { .. } | Self::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn provisioning(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provisioning {
            step: step.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for InitError {
    fn from(e: figment::Error) -> Self {
        Self::Settings(e.to_string())
    }
}

/// Result type alias for orchestrator operations.
pub type InitResult<T> = Result<T, InitError>;
