//! Credential and provisioning policy.
//!
//! [`ProvisioningPolicy`] is the raw, resolved view of the `MYSQL_*`
//! variables and is built on every start. [`ProvisioningPolicy::validate_minimum`]
//! turns it into a [`BootstrapPlan`], where the root password mode and the
//! application user can no longer be half-specified. Validation only happens
//! for a fresh volume; an initialized volume never has its credentials
//! re-checked.

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::environment::Environment;
use crate::error::{InitError, InitResult};

/// Explicit root password.
pub const ROOT_PASSWORD: &str = "MYSQL_ROOT_PASSWORD";
/// Allow an empty root password.
pub const ALLOW_EMPTY_PASSWORD: &str = "MYSQL_ALLOW_EMPTY_PASSWORD";
/// Generate a random root password.
pub const RANDOM_ROOT_PASSWORD: &str = "MYSQL_RANDOM_ROOT_PASSWORD";
/// Host for an additional remote root account.
pub const ROOT_HOST: &str = "MYSQL_ROOT_HOST";
/// Database to create.
pub const DATABASE: &str = "MYSQL_DATABASE";
/// Application user to create.
pub const USER: &str = "MYSQL_USER";
/// Application user password.
pub const PASSWORD: &str = "MYSQL_PASSWORD";
/// Skip the timezone table import.
pub const SKIP_TZINFO: &str = "MYSQL_INITDB_SKIP_TZINFO";
/// Expire the root password after initialization.
pub const ONETIME_PASSWORD: &str = "MYSQL_ONETIME_PASSWORD";

/// Default host for the remote root account.
pub const DEFAULT_ROOT_HOST: &str = "%";

/// Resolved provisioning inputs.
#[derive(Debug, Clone)]
pub struct ProvisioningPolicy {
    /// Explicit root password.
    pub root_password: Option<SecretString>,
    /// Empty root password requested.
    pub allow_empty_root_password: bool,
    /// Random root password requested.
    pub random_root_password: bool,
    /// Host for the remote root account.
    pub root_host: String,
    /// Database to create.
    pub database: Option<String>,
    /// Application user.
    pub user: Option<String>,
    /// Application user password.
    pub user_password: Option<SecretString>,
    /// Skip the timezone import.
    pub skip_tz_info: bool,
    /// Expire the root password once init scripts have run.
    pub onetime_root_password_expiry: bool,
}

impl ProvisioningPolicy {
    /// Resolve the policy from the environment.
    ///
    /// Flags count as set when their value is non-empty. Fails if any
    /// variable is supplied both directly and through `_FILE`.
    pub fn from_environment(env: &Environment) -> InitResult<Self> {
        let flag = |name: &str| -> InitResult<bool> { Ok(env.resolve(name, None)?.is_some()) };

        Ok(Self {
            root_password: env.resolve(ROOT_PASSWORD, None)?.map(SecretString::from),
            allow_empty_root_password: flag(ALLOW_EMPTY_PASSWORD)?,
            random_root_password: flag(RANDOM_ROOT_PASSWORD)?,
            root_host: env
                .resolve(ROOT_HOST, Some(DEFAULT_ROOT_HOST))?
                .unwrap_or_else(|| DEFAULT_ROOT_HOST.to_owned()),
            database: env.resolve(DATABASE, None)?,
            user: env.resolve(USER, None)?,
            user_password: env.resolve(PASSWORD, None)?.map(SecretString::from),
            skip_tz_info: flag(SKIP_TZINFO)?,
            onetime_root_password_expiry: flag(ONETIME_PASSWORD)?,
        })
    }

    /// Enforce the minimum environment for a fresh volume.
    ///
    /// Exactly one root password option must be set and the application
    /// user may not be `root`. A user without a password, or a password
    /// without a user, is accepted with a warning and ignored.
    pub fn validate_minimum(self) -> InitResult<BootstrapPlan> {
        let mut selected = Vec::new();
        if self.root_password.is_some() {
            selected.push(ROOT_PASSWORD);
        }
        if self.allow_empty_root_password {
            selected.push(ALLOW_EMPTY_PASSWORD);
        }
        if self.random_root_password {
            selected.push(RANDOM_ROOT_PASSWORD);
        }

        let root = match selected.as_slice() {
            [] => return Err(InitError::MissingRootPassword),
            [_] => match self.root_password {
                Some(password) => RootPassword::Explicit(password),
                None if self.random_root_password => RootPassword::Random,
                None => RootPassword::Empty,
            },
            _ => {
                return Err(InitError::ConflictingRootPassword {
                    options: selected.into_iter().map(String::from).collect(),
                })
            }
        };

        if self.user.as_deref() == Some("root") {
            return Err(InitError::RootUser);
        }

        let user = match (self.user, self.user_password) {
            (Some(name), Some(password)) => Some(AppUser { name, password }),
            (Some(_), None) => {
                warn!("MYSQL_USER specified, but missing MYSQL_PASSWORD; MYSQL_USER will not be created");
                None
            }
            (None, Some(_)) => {
                warn!("MYSQL_PASSWORD specified, but missing MYSQL_USER; MYSQL_PASSWORD will be ignored");
                None
            }
            (None, None) => None,
        };

        Ok(BootstrapPlan {
            root,
            root_host: self.root_host,
            database: self.database,
            user,
            skip_tz_info: self.skip_tz_info,
            expire_root_password: self.onetime_root_password_expiry,
        })
    }
}

/// How the root password is established.
#[derive(Debug, Clone)]
pub enum RootPassword {
    /// Operator-supplied password.
    Explicit(SecretString),
    /// Explicitly empty password.
    Empty,
    /// Generated at bootstrap and reported once.
    Random,
}

/// Application account created alongside the database.
#[derive(Debug, Clone)]
pub struct AppUser {
    /// Account name.
    pub name: String,
    /// Account password.
    pub password: SecretString,
}

/// Validated provisioning plan for a fresh volume.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    /// Root password mode.
    pub root: RootPassword,
    /// Host for the remote root account.
    pub root_host: String,
    /// Database to create.
    pub database: Option<String>,
    /// Application user to create.
    pub user: Option<AppUser>,
    /// Skip the timezone import.
    pub skip_tz_info: bool,
    /// Expire the root password after init scripts.
    pub expire_root_password: bool,
}

impl BootstrapPlan {
    /// Whether a root account for a non-local host should be created.
    #[must_use]
    pub fn wants_remote_root(&self) -> bool {
        !self.root_host.is_empty() && self.root_host != "localhost"
    }

    /// The operator-supplied root password, if any.
    #[must_use]
    pub fn explicit_root_password(&self) -> Option<&str> {
        match &self.root {
            RootPassword::Explicit(password) => Some(password.expose_secret()),
            RootPassword::Empty | RootPassword::Random => None,
        }
    }
}
