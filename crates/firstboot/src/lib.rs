//! First-boot orchestration for a MySQL container image.
//!
//! On every container start the orchestrator asks the server binary for its
//! effective configuration, prepares the directories it will write to and,
//! when the data directory is empty, runs the one-time bootstrap:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Resolver   │──▶│ Directories  │──▶│  Temp server │──▶│  Provision + │
//! │ (--help rpt) │   │  + ownership │   │ (socket only)│   │  init files  │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!                                                                 │
//!                                                                 ▼
//!                                                          ┌──────────────┐
//!                                                          │ exec server  │
//!                                                          └──────────────┘
//! ```
//!
//! An initialized volume skips straight to the handoff. Provisioning inputs
//! come from the `MYSQL_*` environment (see [`policy`]); the location of the
//! engine tooling comes from [`config::Settings`].

pub mod config;
pub mod dirs;
pub mod engine;
pub mod entry;
pub mod environment;
pub mod error;
pub mod policy;
pub mod provision;
pub mod scripts;

pub use config::Settings;
pub use entry::{EntryController, EntryState, Handoff, Invocation, VolumeState};
pub use environment::{EnvDelta, Environment};
pub use error::{ErrorKind, InitError, InitResult};
pub use policy::{BootstrapPlan, ProvisioningPolicy, RootPassword};
pub use scripts::{PipelineReport, ScriptKind, ScriptPipeline, ScriptQueue};
