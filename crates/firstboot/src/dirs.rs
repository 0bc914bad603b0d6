//! Directory provisioning for the engine.
//!
//! The engine needs its data directory, the socket's directory and the
//! directories of any log, pid or keyring files it was configured with.
//! They are created if missing and, when running as root, handed to the
//! service account.

use std::collections::BTreeSet;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::unistd::{Uid, User};
use tracing::{debug, info};

use crate::engine::RuntimeConfig;
use crate::error::{InitError, InitResult};

/// The account that should own the engine's directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    /// Account name.
    pub name: String,
    /// Account uid.
    pub uid: Uid,
}

impl Owner {
    /// Look up an account in the passwd database.
    pub fn lookup(name: &str) -> InitResult<Self> {
        let user = User::from_name(name)
            .map_err(std::io::Error::from)?
            .ok_or_else(|| InitError::UnknownUser(name.to_owned()))?;
        Ok(Self {
            name: user.name,
            uid: user.uid,
        })
    }

    /// The account the process is running as.
    #[must_use]
    pub fn current() -> Self {
        let uid = nix::unistd::geteuid();
        let name = User::from_uid(uid)
            .ok()
            .flatten()
            .map_or_else(|| uid.to_string(), |u| u.name);
        Self { name, uid }
    }
}

/// The set of directories the engine needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryPlan {
    dirs: BTreeSet<PathBuf>,
}

impl DirectoryPlan {
    /// Compute the plan from the engine's runtime configuration.
    ///
    /// File-valued auxiliary paths contribute their parent directory;
    /// `secure-file-priv` already names a directory.
    #[must_use]
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert(config.data_dir.clone());
        if let Some(parent) = non_empty_parent(&config.socket) {
            dirs.insert(parent);
        }

        for (role, path) in &config.aux_paths {
            if role.is_directory() {
                dirs.insert(path.clone());
            } else if let Some(parent) = non_empty_parent(path) {
                dirs.insert(parent);
            }
        }

        Self { dirs }
    }

    /// Planned directories in order.
    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }
}

/// Filesystem changes made by [`ensure`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Directories that were created.
    pub created: Vec<PathBuf>,
    /// Entries whose owner was changed.
    pub reowned: Vec<PathBuf>,
}

impl ProvisionReport {
    /// Whether nothing was written.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.created.is_empty() && self.reowned.is_empty()
    }
}

/// Create missing directories and, if `owner` is given, re-own every entry
/// beneath them that the owner does not already own.
///
/// Symlinks are re-owned themselves and never followed. Only the owning
/// user changes; groups are left alone. Running this against a tree that is
/// already correct writes nothing.
pub fn ensure(plan: &DirectoryPlan, owner: Option<&Owner>) -> InitResult<ProvisionReport> {
    let mut report = ProvisionReport::default();

    for dir in plan.dirs() {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|source| InitError::Directory {
                path: dir.to_owned(),
                source,
            })?;
            debug!(path = %dir.display(), "created directory");
            report.created.push(dir.to_owned());
        }
    }

    if let Some(owner) = owner {
        for dir in plan.dirs() {
            reown_tree(dir, owner, &mut report.reowned)?;
        }
        if !report.reowned.is_empty() {
            info!(
                user = %owner.name,
                count = report.reowned.len(),
                "changed ownership of engine paths"
            );
        }
    }

    Ok(report)
}

fn reown_tree(path: &Path, owner: &Owner, reowned: &mut Vec<PathBuf>) -> InitResult<()> {
    let io_err = |source| InitError::Directory {
        path: path.to_owned(),
        source,
    };

    let meta = std::fs::symlink_metadata(path).map_err(io_err)?;
    if meta.uid() != owner.uid.as_raw() && !reowned.iter().any(|p| p == path) {
        std::os::unix::fs::lchown(path, Some(owner.uid.as_raw()), None).map_err(io_err)?;
        reowned.push(path.to_owned());
    }

    if meta.is_dir() {
        for entry in std::fs::read_dir(path).map_err(io_err)? {
            reown_tree(&entry.map_err(io_err)?.path(), owner, reowned)?;
        }
    }

    Ok(())
}

fn non_empty_parent(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::AuxPathRole;
    use std::collections::BTreeMap;

    fn runtime(root: &Path) -> RuntimeConfig {
        let mut aux_paths = BTreeMap::new();
        aux_paths.insert(AuxPathRole::PidFile, root.join("run/mysqld/mysqld.pid"));
        aux_paths.insert(AuxPathRole::SecureFilePriv, root.join("files"));
        aux_paths.insert(AuxPathRole::SlowQueryLog, root.join("log/slow.log"));
        RuntimeConfig {
            data_dir: root.join("data"),
            socket: root.join("run/mysqld/mysqld.sock"),
            aux_paths,
        }
    }

    #[test]
    fn plan_uses_parents_of_file_paths() {
        let root = Path::new("/srv");
        let plan = DirectoryPlan::from_runtime(&runtime(root));
        let dirs: Vec<_> = plan.dirs().collect();
        assert_eq!(
            dirs,
            vec![
                Path::new("/srv/data"),
                Path::new("/srv/files"),
                Path::new("/srv/log"),
                Path::new("/srv/run/mysqld"),
            ]
        );
    }

    #[test]
    fn ensure_creates_missing_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = DirectoryPlan::from_runtime(&runtime(tmp.path()));

        let report = ensure(&plan, None).unwrap();
        assert_eq!(report.created.len(), 4);
        for dir in plan.dirs() {
            assert!(dir.is_dir());
        }
    }

    #[test]
    fn ensure_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = DirectoryPlan::from_runtime(&runtime(tmp.path()));
        let owner = Owner::current();

        let first = ensure(&plan, Some(&owner)).unwrap();
        assert!(!first.created.is_empty());
        assert!(first.reowned.is_empty());

        let second = ensure(&plan, Some(&owner)).unwrap();
        assert!(second.is_unchanged());
    }

    #[test]
    fn lookup_unknown_user_fails() {
        let err = Owner::lookup("firstboot-no-such-user").unwrap_err();
        assert!(matches!(err, InitError::UnknownUser(_)));
    }
}
