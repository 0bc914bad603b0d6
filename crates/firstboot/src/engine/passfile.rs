//! Ephemeral client option file.
//!
//! Credentials reach the engine clients through `--defaults-extra-file`
//! pointing at `/dev/fd/N`, the read end of a pipe the child inherits. The
//! password never touches the filesystem and never appears in argv.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::error::InitResult;

/// A `[client]` option file backed by an inheritable pipe.
///
/// The pipe is filled and its write end closed on construction, so the
/// child sees a complete file followed by EOF. Drop the value once the
/// child has been spawned.
#[derive(Debug)]
pub struct CredentialFile {
    read: OwnedFd,
}

impl CredentialFile {
    /// Create an option file carrying `password`, or an empty one.
    pub fn new(password: Option<&SecretString>) -> InitResult<Self> {
        let (read, write) = nix::unistd::pipe().map_err(std::io::Error::from)?;

        let mut writer = File::from(write);
        if let Some(password) = password {
            writer.write_all(render(password.expose_secret()).as_bytes())?;
        }
        drop(writer);

        Ok(Self { read })
    }

    /// Path the child opens.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/fd/{}", self.read.as_raw_fd()))
    }

    /// The `--defaults-extra-file` argument.
    #[must_use]
    pub fn arg(&self) -> String {
        format!("--defaults-extra-file={}", self.path().display())
    }
}

/// Render the option file body, quoting the password.
fn render(password: &str) -> String {
    let escaped = password.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[client]\npassword=\"{escaped}\"\n")
}
