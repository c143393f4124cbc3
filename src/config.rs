//! Configuration types for the backup scheduler.

use crate::restic::command::RetentionPolicy;
use crate::scheduler::state::SchedulerPolicy;
use crate::warden_dirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Backup cadence and forget period.
    pub schedule: ScheduleConfig,
    /// restic binary and input file locations.
    pub restic: ResticConfig,
    /// `restic forget` keep-policy.
    pub retention: RetentionConfig,
    /// Chrono history retention.
    pub history: HistoryConfig,
    /// Stale-lock heuristic.
    pub lock: LockConfig,
    /// Graceful shutdown timing.
    pub shutdown: ShutdownConfig,
}

/// Timer and pipeline cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes between two scheduler ticks.
    pub backup_every_n_minutes: u64,
    /// A `forget` runs after this many successful backups.
    pub forget_every_n_backups: u32,
    /// Days between two "is there a newer release" checks.
    pub check_new_version_every_n_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            backup_every_n_minutes: 30,
            forget_every_n_backups: 10,
            check_new_version_every_n_days: 7,
        }
    }
}

/// restic invocation inputs.
///
/// Path fields left unset resolve to the files under
/// [`warden_dirs::config_dir`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResticConfig {
    /// Name or path of the restic executable.
    pub binary: String,
    /// File given to `--files-from`.
    pub files_from: Option<PathBuf>,
    /// File given to `--exclude-file` when it exists.
    pub exclude_file: Option<PathBuf>,
    /// File given to `--password-file`.
    pub password_file: Option<PathBuf>,
    /// `export NAME=value` declarations merged into the child environment.
    pub env_file: Option<PathBuf>,
    /// Executable run before each backup when present.
    pub pre_backup_hook: Option<PathBuf>,
}

impl Default for ResticConfig {
    fn default() -> Self {
        Self {
            binary: "restic".to_owned(),
            files_from: None,
            exclude_file: None,
            password_file: None,
            env_file: None,
            pre_backup_hook: None,
        }
    }
}

impl ResticConfig {
    /// Resolve every optional path against the directory defaults.
    #[must_use]
    pub fn resolve_paths(&self) -> ResticPaths {
        ResticPaths {
            files_from: self
                .files_from
                .clone()
                .unwrap_or_else(warden_dirs::files_from_file),
            exclude_file: self
                .exclude_file
                .clone()
                .unwrap_or_else(warden_dirs::exclude_file),
            password_file: self
                .password_file
                .clone()
                .unwrap_or_else(warden_dirs::password_file),
            env_file: self.env_file.clone().unwrap_or_else(warden_dirs::env_file),
            pre_backup_hook: self
                .pre_backup_hook
                .clone()
                .unwrap_or_else(warden_dirs::pre_backup_hook),
        }
    }
}

/// Fully resolved input file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResticPaths {
    pub files_from: PathBuf,
    pub exclude_file: PathBuf,
    pub password_file: PathBuf,
    pub env_file: PathBuf,
    pub pre_backup_hook: PathBuf,
}

/// `restic forget` keep counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub keep_last: u32,
    pub keep_hourly: u32,
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    pub keep_yearly: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            keep_last: policy.keep_last,
            keep_hourly: policy.keep_hourly,
            keep_daily: policy.keep_daily,
            keep_weekly: policy.keep_weekly,
            keep_monthly: policy.keep_monthly,
            keep_yearly: policy.keep_yearly,
        }
    }
}

/// Number of (start, duration) chronos kept per operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 10 }
    }
}

/// Lock-age threshold above which a repository lock is considered stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// A lock younger than an hour must be strictly older than this to be broken.
    pub stale_after_minutes: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_minutes: 30,
        }
    }
}

/// Shutdown wait policy for an in-flight operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Delay between two "has the child exited yet" checks.
    pub poll_interval_ms: u64,
    /// Upper bound on the wait; the child is never killed.
    pub max_wait_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            max_wait_secs: 600,
        }
    }
}

impl WardenConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::WardenError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::WardenError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        warden_dirs::config_file()
    }

    /// Scheduler policy constants derived from this config.
    #[must_use]
    pub fn scheduler_policy(&self) -> SchedulerPolicy {
        SchedulerPolicy {
            forget_every_n_backups: self.schedule.forget_every_n_backups.max(1),
            history_capacity: self.history.capacity.max(1),
        }
    }

    /// Forget keep-policy derived from this config.
    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_last: self.retention.keep_last,
            keep_hourly: self.retention.keep_hourly,
            keep_daily: self.retention.keep_daily,
            keep_weekly: self.retention.keep_weekly,
            keep_monthly: self.retention.keep_monthly,
            keep_yearly: self.retention.keep_yearly,
        }
    }
}
