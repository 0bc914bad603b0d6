//! Container entrypoint.
//!
//! Runs first-boot setup if needed, then replaces itself with the server
//! (or whatever command was given).

use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use firstboot::{entry, EntryController, Environment, InitResult, Invocation, Settings};

fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    match run() {
        Ok(handoff) => {
            let err = handoff.exec();
            error!(error = %err, kind = %err.kind(), "handoff failed");
        }
        Err(e) => error!(error = %e, kind = %e.kind(), "initialization failed"),
    }
    ExitCode::FAILURE
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("firstboot=info".parse()?))
        .with_target(false)
        .with_ansi(false)
        .init();
    Ok(())
}

/// Drive the controller on a single-threaded runtime that is dropped before
/// the caller execs.
fn run() -> InitResult<firstboot::Handoff> {
    let settings = Settings::load()?;
    let invocation = Invocation::parse(entry::process_args(), &settings.engine.server);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let mut controller = EntryController::new(settings, Environment::from_process());
    runtime.block_on(controller.run(invocation))
}
