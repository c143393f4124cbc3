//! Single-instance guard.
//!
//! Two schedulers sharing one state record would race on it, so a pid file
//! next to the record marks ownership. A pid file left by a dead process is
//! taken over.

use crate::error::{Result, WardenError};
use std::path::{Path, PathBuf};

/// Held for the lifetime of the scheduler; removes its pid file on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    pid: u32,
}

impl InstanceLock {
    /// Claim the pid file at `path` for the current process.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::AlreadyRunning`] if the recorded pid belongs to
    /// another live process, or an I/O-flavoured error if the file cannot be
    /// written.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        Self::acquire_for(path, std::process::id())
    }

    fn acquire_for(path: impl Into<PathBuf>, pid: u32) -> Result<Self> {
        let path = path.into();

        if let Some(existing) = read_pid(&path) {
            if existing != pid && process_alive(existing) {
                return Err(WardenError::AlreadyRunning { pid: existing });
            }
            if existing != pid {
                tracing::info!(stale_pid = existing, "taking over stale pid file");
            }
        }

        write_pid(&path, pid)?;
        Ok(Self { path, pid })
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("cannot remove pid file {}: {e}", self.path.display());
            }
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    let raw = std::fs::read_to_string(path).ok()?;
    match raw.trim().parse::<u32>() {
        Ok(pid) => Some(pid),
        Err(_) => {
            tracing::warn!("ignoring malformed pid file at {}", path.display());
            None
        }
    }
}

fn write_pid(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            WardenError::State(format!("cannot create pid file directory: {e}"))
        })?;
    }

    let tmp_path = path.with_extension("pid.tmp");
    std::fs::write(&tmp_path, pid.to_string())
        .map_err(|e| WardenError::State(format!("cannot write pid temp file: {e}")))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| WardenError::State(format!("cannot finalize pid file: {e}")))?;
    Ok(())
}

/// `kill(pid, 0)` succeeds (or fails with `EPERM`) only for a live process.
fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs the existence and permission check only.
    let rc = unsafe { libc::kill(raw, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
