//! Centralized filesystem paths for restic-warden.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Directory Layout
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Config (prefs, env, password, state) | `~/Library/Application Support/restic-warden/` | `~/.config/restic-warden/` |
//! | Data (logs) | `~/Library/Application Support/restic-warden/` | `~/.local/share/restic-warden/` |
//!
//! # Environment Overrides
//!
//! - `RESTIC_WARDEN_CONFIG_DIR`: overrides [`config_dir`]
//! - `RESTIC_WARDEN_DATA_DIR`: overrides [`data_dir`]

use std::path::PathBuf;

/// Directory holding user-edited inputs and the persisted state record.
///
/// Resolves to `dirs::config_dir()/restic-warden/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("RESTIC_WARDEN_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("restic-warden"))
        .unwrap_or_else(|| PathBuf::from("/tmp/restic-warden-config"))
}

/// Application data root directory.
///
/// Resolves to `dirs::data_dir()/restic-warden/` by default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("RESTIC_WARDEN_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("restic-warden"))
        .unwrap_or_else(|| PathBuf::from("/tmp/restic-warden-data"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Scheduler state record (`config_dir()/state.json`).
#[must_use]
pub fn state_file() -> PathBuf {
    config_dir().join("state.json")
}

/// Single-instance pid file (`config_dir()/restic-warden.pid`).
#[must_use]
pub fn pid_file() -> PathBuf {
    config_dir().join("restic-warden.pid")
}

/// List of paths handed to `restic backup --files-from`.
#[must_use]
pub fn files_from_file() -> PathBuf {
    config_dir().join("bkp_include")
}

/// Optional exclude list handed to `restic backup --exclude-file`.
#[must_use]
pub fn exclude_file() -> PathBuf {
    config_dir().join("bkp_exclude")
}

/// Repository password file.
#[must_use]
pub fn password_file() -> PathBuf {
    config_dir().join(".pw")
}

/// Shell-like `export NAME=value` declarations for the restic environment.
#[must_use]
pub fn env_file() -> PathBuf {
    config_dir().join("env.sh")
}

/// Optional executable run before every backup.
#[must_use]
pub fn pre_backup_hook() -> PathBuf {
    config_dir().join("pre_backup")
}
