//! Init artifact pipeline.
//!
//! Artifacts are taken from the init directory in byte order of their file
//! names and applied one after another against the temporary server. The
//! first failure stops the pipeline.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use nix::unistd::AccessFlags;
use tracing::{debug, info, instrument, warn};

use crate::engine::{ExecOptions, SqlSession};
use crate::environment::Environment;
use crate::error::{InitError, InitResult};

/// Shell snippet used to source a script and write the resulting
/// environment to the file named by `$2`.
const SOURCE_AND_REPORT: &str = r#"set -eo pipefail; . "$1"; env -0 > "$2""#;

/// How an artifact is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Executable `.sh`, run as its own process.
    ExecutableShell,
    /// Non-executable `.sh`, sourced into the orchestrator's environment.
    SourcedShell,
    /// Plain `.sql`.
    Sql,
    /// `.sql.bz2`.
    SqlBzip2,
    /// `.sql.gz`.
    SqlGzip,
    /// `.sql.xz`.
    SqlXz,
    /// `.sql.zst`.
    SqlZstd,
    /// Anything else; skipped.
    Unrecognized,
}

impl ScriptKind {
    /// Classify a path by its suffix and, for shell scripts, its execute bit.
    #[must_use]
    pub fn classify(path: &Path) -> Self {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Self::Unrecognized;
        };

        if name.ends_with(".sh") {
            if nix::unistd::access(path, AccessFlags::X_OK).is_ok() {
                Self::ExecutableShell
            } else {
                Self::SourcedShell
            }
        } else if name.ends_with(".sql") {
            Self::Sql
        } else if name.ends_with(".sql.bz2") {
            Self::SqlBzip2
        } else if name.ends_with(".sql.gz") {
            Self::SqlGzip
        } else if name.ends_with(".sql.xz") {
            Self::SqlXz
        } else if name.ends_with(".sql.zst") {
            Self::SqlZstd
        } else {
            Self::Unrecognized
        }
    }
}

/// One classified artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    /// Artifact path.
    pub path: PathBuf,
    /// How it is applied.
    pub kind: ScriptKind,
}

impl ScriptEntry {
    /// Classify `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = ScriptKind::classify(&path);
        Self { path, kind }
    }
}

/// Ordered list of artifacts to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptQueue {
    entries: Vec<ScriptEntry>,
}

impl ScriptQueue {
    /// List the init directory.
    ///
    /// A missing directory yields an empty queue. Dotfiles and
    /// subdirectories are skipped; the rest are ordered by the bytes of
    /// their file names.
    pub fn from_dir(dir: &Path) -> InitResult<Self> {
        let unreadable = |source| InitError::InitDirUnreadable {
            path: dir.to_owned(),
            source,
        };

        let read_dir = match std::fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "no init directory");
                return Ok(Self::default());
            }
            Err(e) => return Err(unreadable(e)),
        };

        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(unreadable)?;
            let name = entry.file_name();
            if name.as_encoded_bytes().starts_with(b".") {
                continue;
            }
            if entry.file_type().map_err(unreadable)?.is_dir() {
                debug!(path = %entry.path().display(), "skipping directory in init dir");
                continue;
            }
            names.push(name);
        }
        names.sort();

        Ok(Self::from_paths(names.into_iter().map(|n| dir.join(n))))
    }

    /// Build a queue in the given order.
    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            entries: paths.into_iter().map(ScriptEntry::new).collect(),
        }
    }

    /// Queued entries.
    #[must_use]
    pub fn entries(&self) -> &[ScriptEntry] {
        &self.entries
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Artifacts applied, in order.
    pub executed: Vec<PathBuf>,
    /// Artifacts skipped as unrecognized.
    pub skipped: Vec<PathBuf>,
}

/// Applies a [`ScriptQueue`] against the temporary server.
#[derive(Debug)]
pub struct ScriptPipeline<'a> {
    session: &'a SqlSession,
    shell: PathBuf,
}

impl<'a> ScriptPipeline<'a> {
    /// Create a pipeline that sources scripts with `shell`.
    pub fn new(session: &'a SqlSession, shell: impl Into<PathBuf>) -> Self {
        Self {
            session,
            shell: shell.into(),
        }
    }

    /// Apply every entry in order.
    ///
    /// Sourced scripts may change `env`; the change is visible to every
    /// later entry and to the caller.
    pub async fn run(
        &self,
        queue: &ScriptQueue,
        env: &mut Environment,
    ) -> InitResult<PipelineReport> {
        let mut report = PipelineReport::default();

        for entry in queue.entries() {
            match entry.kind {
                ScriptKind::Unrecognized => {
                    warn!(path = %entry.path.display(), "ignoring unrecognized init file");
                    report.skipped.push(entry.path.clone());
                    continue;
                }
                ScriptKind::ExecutableShell => self.run_executable(&entry.path, env).await?,
                ScriptKind::SourcedShell => self.source(&entry.path, env).await?,
                kind => self.run_sql(&entry.path, kind, env).await?,
            }
            report.executed.push(entry.path.clone());
        }

        Ok(report)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn run_executable(&self, path: &Path, env: &Environment) -> InitResult<()> {
        info!("running init script");
        let status = crate::engine::command(path, env)
            .status()
            .await
            .map_err(|e| script_failed(path, format!("failed to spawn: {e}")))?;
        if !status.success() {
            return Err(script_failed(path, format!("exited with {status}")));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn source(&self, path: &Path, env: &mut Environment) -> InitResult<()> {
        info!("sourcing init script");

        // Written to a file: background jobs left running by the script
        // must not hold the report open.
        let report = tempfile::NamedTempFile::new()?;

        let status = crate::engine::command(&self.shell, env)
            .arg("-c")
            .arg(SOURCE_AND_REPORT)
            .arg("firstboot")
            .arg(path)
            .arg(report.path())
            .status()
            .await
            .map_err(|e| script_failed(path, format!("failed to spawn shell: {e}")))?;

        if !status.success() {
            return Err(script_failed(path, format!("exited with {status}")));
        }

        let output = std::fs::read(report.path())
            .map_err(|e| script_failed(path, format!("failed to read environment: {e}")))?;

        // A script that calls `exit 0` never reaches the report.
        if output.is_empty() {
            debug!("sourced script reported no environment");
            return Ok(());
        }

        let delta = env.diff(&Environment::parse_nul_separated(&output));
        if !delta.is_empty() {
            debug!(
                set = delta.set.len(),
                removed = delta.removed.len(),
                "applying environment from sourced script"
            );
            env.apply(&delta);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn run_sql(&self, path: &Path, kind: ScriptKind, env: &Environment) -> InitResult<()> {
        info!("running sql init file");

        let file =
            File::open(path).map_err(|e| script_failed(path, format!("failed to open: {e}")))?;
        let reader = decoder(kind, file).map_err(|e| script_failed(path, e.to_string()))?;

        let step = path.display().to_string();
        self.session
            .exec_reader(env, reader, &ExecOptions::default(), &step)
            .await
            .map_err(|e| script_failed(path, e.to_string()))
    }
}

/// Wrap `file` in the decompressor matching `kind`.
fn decoder(kind: ScriptKind, file: File) -> std::io::Result<Box<dyn Read + Send>> {
    Ok(match kind {
        ScriptKind::SqlBzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
        ScriptKind::SqlGzip => Box::new(flate2::read::GzDecoder::new(file)),
        ScriptKind::SqlXz => Box::new(xz2::read::XzDecoder::new(file)),
        ScriptKind::SqlZstd => Box::new(zstd::Decoder::new(file)?),
        _ => Box::new(file),
    })
}

fn script_failed(path: &Path, message: impl Into<String>) -> InitError {
    InitError::ScriptFailed {
        path: path.to_owned(),
        message: message.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn touch(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[rstest]
    #[case("schema.sql", ScriptKind::Sql)]
    #[case("dump.sql.bz2", ScriptKind::SqlBzip2)]
    #[case("dump.sql.gz", ScriptKind::SqlGzip)]
    #[case("dump.sql.xz", ScriptKind::SqlXz)]
    #[case("dump.sql.zst", ScriptKind::SqlZstd)]
    #[case("README.md", ScriptKind::Unrecognized)]
    #[case("dump.sql.tar", ScriptKind::Unrecognized)]
    fn classifies_by_suffix(#[case] name: &str, #[case] kind: ScriptKind) {
        assert_eq!(ScriptKind::classify(Path::new(name)), kind);
    }

    #[test]
    fn shell_kind_follows_execute_bit() {
        let dir = tempfile::tempdir().unwrap();
        let exec = touch(dir.path(), "exec.sh", 0o755);
        let sourced = touch(dir.path(), "sourced.sh", 0o644);
        assert_eq!(ScriptKind::classify(&exec), ScriptKind::ExecutableShell);
        assert_eq!(ScriptKind::classify(&sourced), ScriptKind::SourcedShell);
    }

    #[test]
    fn queue_is_byte_ordered_without_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.sql", "a.sh", "C.sql", ".hidden.sql", "10-x.sql", "2-y.sql"] {
            touch(dir.path(), name, 0o644);
        }
        std::fs::create_dir(dir.path().join("nested.sql")).unwrap();

        let queue = ScriptQueue::from_dir(dir.path()).unwrap();
        let names: Vec<_> = queue
            .entries()
            .iter()
            .map(|e| e.path.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["10-x.sql", "2-y.sql", "C.sql", "a.sh", "b.sql"]);
    }

    #[test]
    fn missing_dir_is_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ScriptQueue::from_dir(&dir.path().join("absent")).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn file_in_place_of_dir_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), "initdb", 0o644);
        let err = ScriptQueue::from_dir(&file).unwrap_err();
        assert!(matches!(err, InitError::InitDirUnreadable { .. }));
    }

    fn compress(kind: ScriptKind, data: &[u8]) -> Vec<u8> {
        match kind {
            ScriptKind::SqlBzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
            ScriptKind::SqlGzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
            ScriptKind::SqlXz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
            ScriptKind::SqlZstd => zstd::encode_all(data, 0).unwrap(),
            _ => data.to_vec(),
        }
    }

    #[rstest]
    #[case::plain("a.sql", ScriptKind::Sql)]
    #[case::bzip2("a.sql.bz2", ScriptKind::SqlBzip2)]
    #[case::gzip("a.sql.gz", ScriptKind::SqlGzip)]
    #[case::xz("a.sql.xz", ScriptKind::SqlXz)]
    #[case::zstd("a.sql.zst", ScriptKind::SqlZstd)]
    fn decoder_yields_plain_sql(#[case] name: &str, #[case] kind: ScriptKind) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, compress(kind, b"SELECT 1;\n")).unwrap();
        assert_eq!(ScriptKind::classify(&path), kind);

        let mut out = String::new();
        decoder(kind, File::open(&path).unwrap())
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "SELECT 1;\n");
    }
}
