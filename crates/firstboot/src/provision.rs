//! Provisioning statements for a fresh volume.
//!
//! The statement builders are pure so the exact SQL can be checked without
//! an engine; [`Provisioner`] sends them through a [`SqlSession`] one batch
//! at a time.

use std::path::PathBuf;
use std::process::Stdio;

use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::engine::{ExecOptions, SqlSession};
use crate::environment::Environment;
use crate::error::{InitError, InitResult};
use crate::policy::{BootstrapPlan, RootPassword};

/// Length of a generated root password.
pub const GENERATED_PASSWORD_LEN: usize = 32;

/// Placeholder emitted by the tzinfo converter for the local zone.
const TZINFO_PLACEHOLDER: &str = "Local time zone must be set--see zic manual page";

/// Escape a value for use inside a single-quoted SQL string literal.
#[must_use]
pub fn escape_string_literal(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\'', "\\'")
}

/// Quote an identifier with backticks.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Escape the wildcard characters of a database name used in a grant.
#[must_use]
pub fn escape_grant_pattern(name: &str) -> String {
    name.replace('_', "\\_").replace('%', "\\%")
}

/// The root finalization batch.
///
/// Runs with binary logging disabled, sets the local root password, adds the
/// remote root account when `root_host` asks for one, and drops the stock
/// `test` schema.
#[must_use]
pub fn root_setup_sql(password: &str, root_host: Option<&str>) -> String {
    let password = escape_string_literal(password);
    let mut sql = format!(
        "SET @@SESSION.SQL_LOG_BIN=0;\n\
         ALTER USER 'root'@'localhost' IDENTIFIED BY '{password}';\n\
         GRANT ALL ON *.* TO 'root'@'localhost' WITH GRANT OPTION;\n\
         FLUSH PRIVILEGES;\n"
    );
    if let Some(host) = root_host {
        let host = escape_string_literal(host);
        sql.push_str(&format!(
            "CREATE USER 'root'@'{host}' IDENTIFIED BY '{password}';\n\
             GRANT ALL ON *.* TO 'root'@'{host}' WITH GRANT OPTION;\n"
        ));
    }
    sql.push_str("DROP DATABASE IF EXISTS test;\n");
    sql
}

/// `CREATE DATABASE IF NOT EXISTS` for `database`.
#[must_use]
pub fn create_database_sql(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {};\n", quote_identifier(database))
}

/// `CREATE USER` for an application account reachable from any host.
#[must_use]
pub fn create_user_sql(user: &str, password: &str) -> String {
    format!(
        "CREATE USER '{}'@'%' IDENTIFIED BY '{}';\n",
        escape_string_literal(user),
        escape_string_literal(password)
    )
}

/// Grant an application account everything on `database`.
#[must_use]
pub fn grant_database_sql(database: &str, user: &str) -> String {
    format!(
        "GRANT ALL ON {}.* TO '{}'@'%';\n",
        quote_identifier(&escape_grant_pattern(database)),
        escape_string_literal(user)
    )
}

/// Expire the root password for local and, if present, remote root.
#[must_use]
pub fn expire_root_sql(root_host: Option<&str>) -> String {
    let mut sql = String::from("ALTER USER 'root'@'localhost' PASSWORD EXPIRE;\n");
    if let Some(host) = root_host {
        sql.push_str(&format!(
            "ALTER USER 'root'@'{}' PASSWORD EXPIRE;\n",
            escape_string_literal(host)
        ));
    }
    sql
}

/// Generate a random alphanumeric password.
#[must_use]
pub fn generate_password() -> SecretString {
    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect();
    SecretString::from(password)
}

/// Applies a [`BootstrapPlan`] to the temporary server.
#[derive(Debug, Clone)]
pub struct Provisioner {
    plan: BootstrapPlan,
    tzinfo: PathBuf,
    zoneinfo: PathBuf,
    system_schema: String,
}

impl Provisioner {
    /// Create a provisioner for `plan` using the configured engine tooling.
    pub fn new(plan: BootstrapPlan, engine: &EngineConfig) -> Self {
        Self {
            plan,
            tzinfo: engine.tzinfo.clone(),
            zoneinfo: engine.zoneinfo.clone(),
            system_schema: engine.system_schema.clone(),
        }
    }

    /// The plan being applied.
    #[must_use]
    pub fn plan(&self) -> &BootstrapPlan {
        &self.plan
    }

    fn remote_root_host(&self) -> Option<&str> {
        self.plan
            .wants_remote_root()
            .then_some(self.plan.root_host.as_str())
    }

    /// Establish root, the database and the application user.
    ///
    /// On return `session` carries the root password, so later batches and
    /// init scripts authenticate with it.
    #[instrument(skip_all)]
    pub async fn setup_database(&self, session: &mut SqlSession, env: &Environment) -> InitResult<()> {
        if self.plan.skip_tz_info {
            info!("skipping timezone table import");
        } else {
            self.import_timezones(session, env).await?;
        }

        let root_password = match &self.plan.root {
            RootPassword::Explicit(password) => Some(password.clone()),
            RootPassword::Empty => None,
            RootPassword::Random => {
                let password = generate_password();
                info!("GENERATED ROOT PASSWORD: {}", password.expose_secret());
                Some(password)
            }
        };

        let sql = root_setup_sql(
            root_password.as_ref().map_or("", |p| p.expose_secret()),
            self.remote_root_host(),
        );
        session
            .exec(env, "root setup", &sql, &ExecOptions::bootstrap(&self.system_schema))
            .await?;
        session.set_root_password(root_password);

        let in_schema = ExecOptions::in_database(&self.system_schema);

        if let Some(database) = &self.plan.database {
            info!(database = %database, "creating database");
            session
                .exec(env, "create database", &create_database_sql(database), &in_schema)
                .await?;
        }

        if let Some(user) = &self.plan.user {
            info!(user = %user.name, "creating user");
            let mut sql = create_user_sql(&user.name, user.password.expose_secret());
            if let Some(database) = &self.plan.database {
                info!(user = %user.name, database = %database, "granting user access to database");
                sql.push_str(&grant_database_sql(database, &user.name));
            }
            session.exec(env, "create user", &sql, &in_schema).await?;
        }

        Ok(())
    }

    /// Expire the root password if the plan asks for it.
    #[instrument(skip_all)]
    pub async fn expire_root_password(&self, session: &SqlSession, env: &Environment) -> InitResult<()> {
        if !self.plan.expire_root_password {
            return Ok(());
        }
        info!("expiring root password");
        session
            .exec(
                env,
                "expire root password",
                &expire_root_sql(self.remote_root_host()),
                &ExecOptions::in_database(&self.system_schema),
            )
            .await
    }

    async fn import_timezones(&self, session: &SqlSession, env: &Environment) -> InitResult<()> {
        info!(zoneinfo = %self.zoneinfo.display(), "loading timezone tables");

        let output = crate::engine::command(&self.tzinfo, env)
            .arg(&self.zoneinfo)
            .stdout(Stdio::piped())
            .output()
            .await
            .map_err(|source| InitError::Spawn {
                program: self.tzinfo.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(InitError::provisioning(
                "timezone import",
                format!("{} exited with {}", self.tzinfo.display(), output.status),
            ));
        }

        let sql = String::from_utf8_lossy(&output.stdout).replace(TZINFO_PLACEHOLDER, "FCTY");
        session
            .exec(env, "timezone import", &sql, &ExecOptions::bootstrap(&self.system_schema))
            .await
    }
}
