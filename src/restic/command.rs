//! Argument contracts for each operation kind.

use crate::config::ResticPaths;
use crate::restic::env;
use crate::scheduler::operation::OperationKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// `restic forget` keep counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last: u32,
    pub keep_hourly: u32,
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    pub keep_yearly: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_last: 3,
            keep_hourly: 24,
            keep_daily: 7,
            keep_weekly: 4,
            keep_monthly: 12,
            keep_yearly: 5,
        }
    }
}

impl RetentionPolicy {
    fn push_args(&self, args: &mut Vec<String>) {
        for (flag, count) in [
            ("--keep-last", self.keep_last),
            ("--keep-hourly", self.keep_hourly),
            ("--keep-daily", self.keep_daily),
            ("--keep-weekly", self.keep_weekly),
            ("--keep-monthly", self.keep_monthly),
            ("--keep-yearly", self.keep_yearly),
        ] {
            args.push(flag.to_owned());
            args.push(count.to_string());
        }
    }
}

/// A fully resolved child process launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub kind: OperationKind,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Complete child environment; `None` inherits the current one.
    pub env: Option<BTreeMap<String, String>>,
}

impl Invocation {
    /// Command line as a single display string.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Builds [`Invocation`]s from resolved paths and the retention policy.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    binary: PathBuf,
    paths: ResticPaths,
    retention: RetentionPolicy,
}

impl CommandBuilder {
    #[must_use]
    pub fn new(binary: PathBuf, paths: ResticPaths, retention: RetentionPolicy) -> Self {
        Self {
            binary,
            paths,
            retention,
        }
    }

    #[must_use]
    pub fn paths(&self) -> &ResticPaths {
        &self.paths
    }

    /// Whether a pre-backup hook exists and is executable.
    #[must_use]
    pub fn pre_backup_available(&self) -> bool {
        is_executable(&self.paths.pre_backup_hook)
    }

    /// Arguments for a restic operation. The hook takes none.
    #[must_use]
    pub fn arguments(&self, kind: OperationKind) -> Vec<String> {
        let password_file = self.paths.password_file.display().to_string();
        let mut args = Vec::new();
        match kind {
            OperationKind::PreBackup => {}
            OperationKind::Backup => {
                args.push("backup".to_owned());
                args.push("--files-from".to_owned());
                args.push(self.paths.files_from.display().to_string());
                args.push("--password-file".to_owned());
                args.push(password_file);
                if self.paths.exclude_file.exists() {
                    args.push("--exclude-file".to_owned());
                    args.push(self.paths.exclude_file.display().to_string());
                }
            }
            OperationKind::Forget => {
                args.extend(
                    ["forget", "--prune", "-g", "host", "-c", "--password-file"]
                        .map(str::to_owned),
                );
                args.push(password_file);
                self.retention.push_args(&mut args);
            }
            OperationKind::Unlock => {
                args.push("unlock".to_owned());
                args.push("--password-file".to_owned());
                args.push(password_file);
            }
        }
        args
    }

    /// Resolve the launch for `kind`, reading the env file for restic runs.
    #[must_use]
    pub fn build(&self, kind: OperationKind) -> Invocation {
        match kind {
            OperationKind::PreBackup => Invocation {
                kind,
                program: self.paths.pre_backup_hook.clone(),
                args: Vec::new(),
                env: None,
            },
            _ => Invocation {
                kind,
                program: self.binary.clone(),
                args: self.arguments(kind),
                env: Some(env::child_environment(&self.paths.env_file)),
            },
        }
    }
}

/// Locate the restic executable on `PATH`, or use `name` as given.
#[must_use]
pub fn resolve_binary(name: &str) -> PathBuf {
    match which::which(name) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("restic binary {name:?} not found on PATH: {e}");
            PathBuf::from(name)
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
