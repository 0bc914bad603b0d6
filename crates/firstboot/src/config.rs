//! Orchestrator settings.
//!
//! These describe *where* the engine tooling lives, not how the database is
//! provisioned; provisioning inputs come from the `MYSQL_*` environment (see
//! [`crate::policy`]). Settings are layered: built-in defaults, then an
//! optional TOML file, then `FIRSTBOOT_` environment variables split on `__`
//! (e.g. `FIRSTBOOT_ENGINE__SERVER=mariadbd`).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::InitResult;

/// Default location of the optional settings file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/firstboot/firstboot.toml";

/// Root settings structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Engine binaries and layout.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Init artifact handling.
    #[serde(default)]
    pub init: InitConfig,

    /// Service account and privilege drop.
    #[serde(default)]
    pub service: ServiceConfig,
}

impl Settings {
    /// Load settings from the default path and environment.
    pub fn load() -> InitResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific path and environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from(path: impl AsRef<Path>) -> InitResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FIRSTBOOT_").split("__"))
            .extract()?)
    }

    /// Parse settings from a TOML string.
    pub fn parse(content: &str) -> InitResult<Self> {
        Ok(Figment::new().merge(Toml::string(content)).extract()?)
    }
}

/// Engine binaries and on-disk layout.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Server binary; a first argument naming it selects the server path.
    #[serde(default = "default_server")]
    pub server: String,

    /// SQL client used for every statement batch.
    #[serde(default = "default_client")]
    pub client: PathBuf,

    /// Administrative client used for shutdown.
    #[serde(default = "default_admin")]
    pub admin: PathBuf,

    /// Zoneinfo-to-SQL converter.
    #[serde(default = "default_tzinfo")]
    pub tzinfo: PathBuf,

    /// System zoneinfo directory.
    #[serde(default = "default_zoneinfo")]
    pub zoneinfo: PathBuf,

    /// System schema whose presence marks an initialized data directory.
    #[serde(default = "default_system_schema")]
    pub system_schema: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            client: default_client(),
            admin: default_admin(),
            tzinfo: default_tzinfo(),
            zoneinfo: default_zoneinfo(),
            system_schema: default_system_schema(),
        }
    }
}

fn default_server() -> String {
    "mysqld".to_owned()
}

fn default_client() -> PathBuf {
    PathBuf::from("mysql")
}

fn default_admin() -> PathBuf {
    PathBuf::from("mysqladmin")
}

fn default_tzinfo() -> PathBuf {
    PathBuf::from("mysql_tzinfo_to_sql")
}

fn default_zoneinfo() -> PathBuf {
    PathBuf::from("/usr/share/zoneinfo")
}

fn default_system_schema() -> String {
    "mysql".to_owned()
}

/// Init artifact settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InitConfig {
    /// Directory of init artifacts, processed in lexical order.
    #[serde(default = "default_init_dir")]
    pub dir: PathBuf,

    /// Shell used to source non-executable `.sh` artifacts.
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            dir: default_init_dir(),
            shell: default_shell(),
        }
    }
}

fn default_init_dir() -> PathBuf {
    PathBuf::from("/docker-entrypoint-initdb.d")
}

fn default_shell() -> PathBuf {
    PathBuf::from("/bin/bash")
}

/// Service account settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Account that owns the data directory and runs the server.
    #[serde(default = "default_user")]
    pub user: String,

    /// Tool invoked as `<tool> <user> <program> <args...>` to drop root.
    #[serde(default = "default_privilege_tool")]
    pub privilege_tool: PathBuf,

    /// Whether to re-exec as the service account when started as root.
    #[serde(default = "default_drop_privileges")]
    pub drop_privileges: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            privilege_tool: default_privilege_tool(),
            drop_privileges: default_drop_privileges(),
        }
    }
}

fn default_user() -> String {
    "mysql".to_owned()
}

fn default_privilege_tool() -> PathBuf {
    PathBuf::from("gosu")
}

const fn default_drop_privileges() -> bool {
    true
}
