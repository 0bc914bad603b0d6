//! Fake engine binaries for integration tests.
//!
//! Each fake is a small bash script that records how it was called under the
//! sandbox root, so tests can assert on argv, credential files and the SQL
//! that reached the client.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use firstboot::config::Settings;
use firstboot::dirs::Owner;
use firstboot::Environment;
use tempfile::TempDir;

/// Tests in one binary write scripts and then exec them. A script still open
/// for writing when another thread forks makes exec fail with ETXTBSY, so
/// tests that touch fakes run one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

/// Take the per-binary lock.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

const MYSQLD: &str = r#"#!/bin/bash
ROOT="__ROOT__"
echo "mysqld $*" >> "$ROOT/calls.log"
report=
nodefaults=
for arg in "$@"; do
  case "$arg" in
    --bogus) echo "mysqld: unknown variable 'bogus'" >&2; exit 1 ;;
    --initialize-insecure) mkdir -p "$ROOT/data/mysql"; exit 0 ;;
    --daemonize)
      [ -f "$ROOT/fail-start" ] && { echo "mysqld: cannot bind socket" >&2; exit 1; }
      exit 0 ;;
    --no-defaults) nodefaults=1 ;;
    --help) report=1 ;;
  esac
done
if [ -n "$report" ]; then
  sock="$ROOT/run/mysqld.sock"
  [ -n "$nodefaults" ] && sock="$ROOT/run/default.sock"
  echo "mysqld  Ver 8.4.0 for Linux on x86_64 (fake)"
  echo "  --datadir=name      Path to the database root directory"
  echo "datadir                 $ROOT/data/"
  echo "pid-file                $ROOT/pid/mysqld.pid"
  echo "secure-file-priv        NULL"
  echo "socket                  $sock"
fi
"#;

const MYSQL: &str = r#"#!/bin/bash
ROOT="__ROOT__"
mkdir -p "$ROOT/sql"
n=$(ls "$ROOT/sql" | grep -c '\.args$')
f="$ROOT/sql/$(printf '%03d' "$n")"
echo "$*" > "$f.args"
for arg in "$@"; do
  case "$arg" in
    --defaults-extra-file=*) cat "${arg#*=}" > "$f.cred" ;;
  esac
done
cat > "$f.sql"
if [ -f "$ROOT/fail-client" ] && grep -qF -f "$ROOT/fail-client" "$f.sql"; then
  echo "ERROR 1396 (HY000): operation failed" >&2
  exit 1
fi
echo mysql >> "$ROOT/order"
"#;

const MYSQLADMIN: &str = r#"#!/bin/bash
ROOT="__ROOT__"
echo "mysqladmin $*" >> "$ROOT/calls.log"
for arg in "$@"; do
  case "$arg" in
    --defaults-extra-file=*) cat "${arg#*=}" > "$ROOT/admin.cred" ;;
  esac
done
[ -f "$ROOT/fail-shutdown" ] && exit 1
exit 0
"#;

const TZINFO: &str = r#"#!/bin/bash
echo "INSERT INTO time_zone_name VALUES ('Local time zone must be set--see zic manual page', 1);"
"#;

/// A sandbox holding fake engine binaries and the directories they report.
pub struct FakeEngine {
    dir: TempDir,
}

impl FakeEngine {
    /// Write the fakes into a fresh temporary directory.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        std::fs::create_dir(dir.path().join("initdb")).unwrap();

        let engine = Self { dir };
        for (name, body) in [
            ("mysqld", MYSQLD),
            ("mysql", MYSQL),
            ("mysqladmin", MYSQLADMIN),
            ("mysql_tzinfo_to_sql", TZINFO),
        ] {
            write_executable(&engine.bin(name), &body.replace("__ROOT__", &root));
        }
        engine
    }

    /// Sandbox root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a fake binary.
    pub fn bin(&self, name: &str) -> PathBuf {
        self.root().join("bin").join(name)
    }

    /// Data directory reported by the fake server.
    pub fn data_dir(&self) -> PathBuf {
        self.root().join("data")
    }

    /// Socket reported with the operator's options.
    pub fn socket(&self) -> PathBuf {
        self.root().join("run/mysqld.sock")
    }

    /// Socket reported with `--no-defaults`.
    pub fn default_socket(&self) -> PathBuf {
        self.root().join("run/default.sock")
    }

    /// Init directory.
    pub fn init_dir(&self) -> PathBuf {
        self.root().join("initdb")
    }

    /// Mark the volume as initialized.
    pub fn seed_system_schema(&self) {
        std::fs::create_dir_all(self.data_dir().join("mysql")).unwrap();
    }

    /// Add a non-executable init file.
    pub fn add_init_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.init_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Add an executable init script.
    pub fn add_init_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.init_dir().join(name);
        write_executable(&path, body);
        path
    }

    /// Make the client fail on any batch containing `needle`.
    pub fn fail_client_on(&self, needle: &str) {
        std::fs::write(self.root().join("fail-client"), format!("{needle}\n")).unwrap();
    }

    /// Make the daemonized launch fail.
    pub fn fail_server_start(&self) {
        std::fs::write(self.root().join("fail-start"), b"").unwrap();
    }

    /// Make the admin shutdown fail.
    pub fn fail_shutdown(&self) {
        std::fs::write(self.root().join("fail-shutdown"), b"").unwrap();
    }

    /// Settings pointing at the fakes, with no privilege drop.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.engine.server = self.bin("mysqld").display().to_string();
        settings.engine.client = self.bin("mysql");
        settings.engine.admin = self.bin("mysqladmin");
        settings.engine.tzinfo = self.bin("mysql_tzinfo_to_sql");
        settings.engine.zoneinfo = self.root().join("zoneinfo");
        settings.init.dir = self.init_dir();
        settings.service.user = Owner::current().name;
        settings.service.drop_privileges = false;
        settings
    }

    /// `PATH` plus the given variables.
    pub fn env(&self, vars: &[(&str, &str)]) -> Environment {
        let mut env = Environment::new();
        if let Ok(path) = std::env::var("PATH") {
            env.set("PATH", path);
        }
        for (name, value) in vars {
            env.set(*name, *value);
        }
        env
    }

    /// Contents of the engine call log.
    pub fn calls(&self) -> String {
        std::fs::read_to_string(self.root().join("calls.log")).unwrap_or_default()
    }

    /// Order of client calls and script side effects.
    pub fn order(&self) -> Vec<String> {
        std::fs::read_to_string(self.root().join("order"))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Every client batch in call order.
    pub fn batches(&self) -> Vec<Batch> {
        let dir = self.root().join("sql");
        let mut batches = Vec::new();
        for n in 0.. {
            let base = dir.join(format!("{n:03}"));
            let Ok(args) = std::fs::read_to_string(base.with_extension("args")) else {
                break;
            };
            batches.push(Batch {
                args: args.split_whitespace().map(str::to_owned).collect(),
                credentials: std::fs::read_to_string(base.with_extension("cred")).unwrap_or_default(),
                sql: std::fs::read_to_string(base.with_extension("sql")).unwrap_or_default(),
            });
        }
        batches
    }

    /// Credential file seen by the admin client.
    pub fn admin_credentials(&self) -> String {
        std::fs::read_to_string(self.root().join("admin.cred")).unwrap_or_default()
    }
}

/// One recorded client invocation.
#[derive(Debug, Clone)]
pub struct Batch {
    pub args: Vec<String>,
    pub credentials: String,
    pub sql: String,
}

impl Batch {
    /// The database the client ends up in.
    pub fn database(&self) -> Option<&str> {
        self.args
            .iter()
            .rev()
            .find_map(|a| a.strip_prefix("--database="))
    }
}

fn write_executable(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
