//! Explicit environment snapshot.
//!
//! The orchestrator never reads or mutates the process environment after
//! start-up. A snapshot is taken once and threaded through every step;
//! sourced init scripts hand back an [`EnvDelta`] which is applied to it, so
//! later scripts, the SQL client and the final server all see the same
//! variables.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::debug;

use crate::error::{InitError, InitResult};

/// Variables a shell sets for itself; never treated as script output.
const SHELL_MANAGED: &[&str] = &["_", "PWD", "OLDPWD", "SHLVL"];

/// An ordered set of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Create an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current process environment.
    ///
    /// Entries that are not valid UTF-8 are dropped.
    #[must_use]
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Look up a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Whether a variable is present, regardless of its value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Set a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Remove a variable.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }

    /// Iterate over all variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Resolve a variable that may also be supplied through `<NAME>_FILE`.
    ///
    /// Presence of both forms is fatal, even when either is empty. A
    /// non-empty direct value wins; otherwise a non-empty `_FILE` path is
    /// read with trailing newlines stripped; otherwise `default` applies.
    pub fn resolve(&self, name: &str, default: Option<&str>) -> InitResult<Option<String>> {
        let file_var = format!("{name}_FILE");

        if self.contains(name) && self.contains(&file_var) {
            return Err(InitError::AmbiguousVariable {
                var: name.to_owned(),
                file_var,
            });
        }

        if let Some(value) = self.get(name).filter(|v| !v.is_empty()) {
            return Ok(Some(value.to_owned()));
        }

        if let Some(path) = self.get(&file_var).filter(|v| !v.is_empty()) {
            let path = PathBuf::from(path);
            let content =
                std::fs::read_to_string(&path).map_err(|source| InitError::CredentialFile {
                    file_var: file_var.clone(),
                    path: path.clone(),
                    source,
                })?;
            debug!(var = name, file = %path.display(), "resolved variable from file");
            return Ok(Some(content.trim_end_matches('\n').to_owned()));
        }

        Ok(default.map(str::to_owned))
    }

    /// Compute what changed between `self` and `after`.
    ///
    /// Shell bookkeeping variables are ignored, and removals are only
    /// reported for names a shell could have unset.
    #[must_use]
    pub fn diff(&self, after: &Self) -> EnvDelta {
        let set = after
            .iter()
            .filter(|(k, _)| !SHELL_MANAGED.contains(k))
            .filter(|(k, v)| self.get(k) != Some(*v))
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();

        let removed = self
            .vars
            .keys()
            .filter(|k| !after.contains(k))
            .filter(|k| !SHELL_MANAGED.contains(&k.as_str()) && is_shell_identifier(k))
            .cloned()
            .collect();

        EnvDelta { set, removed }
    }

    /// Apply a delta produced by [`Environment::diff`].
    pub fn apply(&mut self, delta: &EnvDelta) {
        for name in &delta.removed {
            self.vars.remove(name);
        }
        for (name, value) in &delta.set {
            self.vars.insert(name.clone(), value.clone());
        }
    }

    /// Parse the NUL-separated output of `env -0`.
    #[must_use]
    pub fn parse_nul_separated(bytes: &[u8]) -> Self {
        bytes
            .split(|b| *b == 0)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let entry = std::str::from_utf8(entry).ok()?;
                let (name, value) = entry.split_once('=')?;
                Some((name.to_owned(), value.to_owned()))
            })
            .collect()
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Environment {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }
}

/// Environment changes made by a sourced script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvDelta {
    /// Variables added or changed.
    pub set: BTreeMap<String, String>,
    /// Variables removed.
    pub removed: BTreeSet<String>,
}

impl EnvDelta {
    /// Whether the script changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty()
    }
}

fn is_shell_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
