//! Entry controller.
//!
//! Decides whether an invocation needs first-boot setup, drives the setup
//! when the volume is fresh, and produces the [`Handoff`] the process finally
//! `exec`s into.

use std::os::unix::process::CommandExt;
use std::path::Path;

use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::dirs::{self, DirectoryPlan, Owner};
use crate::engine::{self, ConfigResolver, RuntimeConfig, ServerCommand, SqlSession, TempServer};
use crate::environment::Environment;
use crate::error::{InitError, InitResult};
use crate::policy::{self, ProvisioningPolicy, RootPassword};
use crate::provision::Provisioner;
use crate::scripts::{ScriptPipeline, ScriptQueue};

/// Flags that make the server print something and exit.
const HELP_FLAGS: &[&str] = &["-?", "--help", "--print-defaults", "-V", "--version"];

/// What the container was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Start the database server with these arguments.
    Server {
        /// Server program.
        program: String,
        /// Server arguments.
        args: Vec<String>,
    },
    /// Run an unrelated command unchanged.
    Passthrough {
        /// Program to run.
        program: String,
        /// Its arguments.
        args: Vec<String>,
    },
}

impl Invocation {
    /// Interpret the container arguments.
    ///
    /// No arguments, or a first argument that is a flag, starts the server.
    /// A first argument naming the server program starts it too, unless a
    /// help-like flag makes it a one-shot query.
    #[must_use]
    pub fn parse(args: Vec<String>, server_program: &str) -> Self {
        let Some(first) = args.first() else {
            return Self::Server {
                program: server_program.to_owned(),
                args,
            };
        };

        if first.starts_with('-') {
            return Self::Server {
                program: server_program.to_owned(),
                args,
            };
        }

        let is_server = names_program(first, server_program);
        let wants_help = args[1..].iter().any(|a| HELP_FLAGS.contains(&a.as_str()));

        let mut args = args;
        let program = args.remove(0);
        if is_server && !wants_help {
            Self::Server { program, args }
        } else {
            Self::Passthrough { program, args }
        }
    }
}

fn names_program(arg: &str, program: &str) -> bool {
    arg == program || Path::new(arg).file_name() == Path::new(program).file_name()
}

/// Whether the data directory already holds a system schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    /// Needs first-boot setup.
    Fresh,
    /// Set up by an earlier start; left untouched.
    AlreadyInitialized,
}

impl VolumeState {
    /// Inspect the data directory.
    #[must_use]
    pub fn detect(runtime: &RuntimeConfig, system_schema: &str) -> Self {
        if runtime.has_system_schema(system_schema) {
            Self::AlreadyInitialized
        } else {
            Self::Fresh
        }
    }
}

/// Controller progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Nothing done yet.
    Start,
    /// The engine accepted its arguments.
    ConfigChecked,
    /// Provisioning variables resolved.
    EnvResolved,
    /// Directories created and owned.
    DirsReady,
    /// Re-executing as the service account.
    PrivilegesDropped,
    /// The volume was set up earlier.
    AlreadyInitialized,
    /// The volume needs setup.
    Fresh,
    /// Provisioning inputs validated.
    Validated,
    /// The bootstrap server is running.
    TempServerUp,
    /// Root, database and user created.
    Provisioned,
    /// Init artifacts applied.
    ScriptsRun,
    /// The bootstrap server has stopped.
    TempServerDown,
    /// Default socket path reconciled.
    SocketFixed,
    /// Ready to exec.
    HandOff,
}

/// The command the process becomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    /// Program to exec.
    pub program: String,
    /// Its arguments.
    pub args: Vec<String>,
    /// Its complete environment.
    pub env: Environment,
}

impl Handoff {
    /// Replace the current process image.
    ///
    /// Only returns on failure.
    pub fn exec(self) -> InitError {
        info!(program = %self.program, "handing off");
        let source = std::process::Command::new(&self.program)
            .args(&self.args)
            .env_clear()
            .envs(self.env.iter())
            .exec();
        InitError::Exec {
            program: self.program,
            source,
        }
    }
}

/// Drives one container start.
#[derive(Debug)]
pub struct EntryController {
    settings: Settings,
    env: Environment,
    history: Vec<EntryState>,
}

impl EntryController {
    /// Create a controller working on a snapshot of the environment.
    pub fn new(settings: Settings, env: Environment) -> Self {
        Self {
            settings,
            env,
            history: vec![EntryState::Start],
        }
    }

    /// States visited so far.
    #[must_use]
    pub fn history(&self) -> &[EntryState] {
        &self.history
    }

    /// The environment as currently known, including changes made by
    /// sourced init scripts.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    fn enter(&mut self, state: EntryState) {
        debug!(?state, "entry state");
        self.history.push(state);
    }

    /// Run the controller to its handoff.
    pub async fn run(&mut self, invocation: Invocation) -> InitResult<Handoff> {
        let (program, args) = match invocation {
            Invocation::Server { program, args } => (program, args),
            Invocation::Passthrough { program, args } => {
                self.enter(EntryState::HandOff);
                return Ok(Handoff {
                    program,
                    args,
                    env: self.env.clone(),
                });
            }
        };

        info!(program = %program, "entrypoint started");
        let server = ServerCommand::new(program, args);
        let resolver = ConfigResolver::new(server.clone(), self.env.clone());

        let runtime = resolver.resolve().await?;
        self.enter(EntryState::ConfigChecked);

        let policy = ProvisioningPolicy::from_environment(&self.env)?;
        self.enter(EntryState::EnvResolved);

        let privileged = nix::unistd::geteuid().is_root();
        let owner = if privileged {
            Some(Owner::lookup(&self.settings.service.user)?)
        } else {
            None
        };
        let plan = DirectoryPlan::from_runtime(&runtime);
        let provisioned = dirs::ensure(&plan, owner.as_ref())?;
        debug!(
            created = provisioned.created.len(),
            reowned = provisioned.reowned.len(),
            "directories ready"
        );
        self.enter(EntryState::DirsReady);

        if privileged && self.settings.service.drop_privileges {
            return self.drop_privileges(&server);
        }

        match VolumeState::detect(&runtime, &self.settings.engine.system_schema) {
            VolumeState::AlreadyInitialized => {
                self.enter(EntryState::AlreadyInitialized);
                info!(datadir = %runtime.data_dir.display(), "database already initialized; skipping setup");
                fix_socket(&resolver, &runtime.socket).await;
                self.enter(EntryState::SocketFixed);
            }
            VolumeState::Fresh => {
                self.enter(EntryState::Fresh);
                self.bootstrap(&server, &resolver, &runtime, policy).await?;
            }
        }

        self.enter(EntryState::HandOff);
        Ok(Handoff {
            program: server.program().to_owned(),
            args: server.args().to_vec(),
            env: self.env.clone(),
        })
    }

    async fn bootstrap(
        &mut self,
        server: &ServerCommand,
        resolver: &ConfigResolver,
        runtime: &RuntimeConfig,
        policy: ProvisioningPolicy,
    ) -> InitResult<()> {
        let plan = policy.validate_minimum()?;
        self.enter(EntryState::Validated);

        let queue = ScriptQueue::from_dir(&self.settings.init.dir)?;
        debug!(artifacts = queue.len(), "init directory listed");

        engine::initialize_data_dir(server, &self.env).await?;

        let temp = TempServer::start(server, &runtime.socket, &self.settings.engine.admin, &self.env)
            .await?;
        self.enter(EntryState::TempServerUp);
        fix_socket(resolver, &runtime.socket).await;
        self.enter(EntryState::SocketFixed);

        let mut session = SqlSession::new(&self.settings.engine.client, temp.socket())
            .with_default_database(plan.database.clone());
        let provisioner = Provisioner::new(plan, &self.settings.engine);
        provisioner.setup_database(&mut session, &self.env).await?;
        self.enter(EntryState::Provisioned);

        // Init scripts see a generated root password; the server does not.
        let generated = matches!(provisioner.plan().root, RootPassword::Random);
        if generated {
            if let Some(password) = session.root_password() {
                self.env.set(policy::ROOT_PASSWORD, password.expose_secret());
            }
        }

        let pipeline = ScriptPipeline::new(&session, &self.settings.init.shell);
        let report = pipeline.run(&queue, &mut self.env).await?;
        if generated {
            self.env.remove(policy::ROOT_PASSWORD);
        }
        info!(
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            "init scripts applied"
        );
        self.enter(EntryState::ScriptsRun);

        provisioner
            .expire_root_password(&session, &self.env)
            .await?;

        temp.stop(session.root_password(), &self.env).await?;
        self.enter(EntryState::TempServerDown);

        info!("init process done; ready for start up");
        Ok(())
    }

    fn drop_privileges(&mut self, server: &ServerCommand) -> InitResult<Handoff> {
        let current = std::env::current_exe()?;
        let service = &self.settings.service;
        info!(user = %service.user, "switching to service account");

        let program = service.privilege_tool.display().to_string();
        let args = [service.user.clone(), current.display().to_string()]
            .into_iter()
            .chain(std::iter::once(server.program().to_owned()))
            .chain(server.args().iter().cloned())
            .collect();

        self.enter(EntryState::PrivilegesDropped);
        Ok(Handoff {
            program,
            args,
            env: self.env.clone(),
        })
    }
}

/// Point the engine's compiled-in socket path at the configured socket.
///
/// Returns whether a link was created. Failures are logged and ignored.
pub async fn fix_socket(resolver: &ConfigResolver, socket: &Path) -> bool {
    let default = match resolver.default_socket().await {
        Ok(Some(default)) => default,
        Ok(None) => return false,
        Err(e) => {
            warn!(error = %e, "could not determine default socket");
            return false;
        }
    };

    if default.as_path() == socket {
        return false;
    }

    match link_socket(&default, socket) {
        Ok(()) => {
            debug!(from = %default.display(), to = %socket.display(), "linked default socket");
            true
        }
        Err(e) => {
            warn!(
                from = %default.display(),
                to = %socket.display(),
                error = %e,
                "could not link default socket"
            );
            false
        }
    }
}

fn link_socket(default: &Path, socket: &Path) -> std::io::Result<()> {
    if std::fs::symlink_metadata(default).is_ok() {
        std::fs::remove_file(default)?;
    }
    std::os::unix::fs::symlink(socket, default)
}

/// The orchestrator's own arguments, without the program name.
#[must_use]
pub fn process_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}
