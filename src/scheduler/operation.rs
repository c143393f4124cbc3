//! Operation kinds, scheduler phases and completion outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One step of the backup pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// User-supplied hook run before the backup.
    PreBackup,
    /// `restic backup`.
    Backup,
    /// `restic forget --prune`.
    Forget,
    /// `restic unlock`.
    Unlock,
}

impl OperationKind {
    /// Phase the scheduler is in while this operation runs.
    #[must_use]
    pub fn running_phase(self) -> CurrentPhase {
        match self {
            Self::PreBackup => CurrentPhase::PreBackupRunning,
            Self::Backup => CurrentPhase::BackupRunning,
            Self::Forget => CurrentPhase::ForgetRunning,
            Self::Unlock => CurrentPhase::UnlockRunning,
        }
    }

    /// Whether this operation is a restic invocation (as opposed to the hook).
    #[must_use]
    pub fn is_restic(self) -> bool {
        !matches!(self, Self::PreBackup)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PreBackup => "pre_backup",
            Self::Backup => "backup",
            Self::Forget => "forget",
            Self::Unlock => "unlock",
        };
        f.write_str(label)
    }
}

/// What the scheduler is doing right now.
///
/// ```text
/// JustLaunched ─┐
///               ├─ want_to_run ─▶ *Running ─▶ … ─▶ Idle ─▶ …
/// Idle ─────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentPhase {
    /// Process started, no cycle has run yet.
    #[default]
    JustLaunched,
    /// Queue drained, waiting for the next tick.
    Idle,
    #[serde(alias = "pre_backup_in_progress")]
    PreBackupRunning,
    #[serde(alias = "backup_in_progress")]
    BackupRunning,
    #[serde(alias = "forget_in_progress")]
    ForgetRunning,
    #[serde(alias = "unlock_in_progress")]
    UnlockRunning,
}

impl CurrentPhase {
    /// Returns `true` while an external process is in flight.
    #[must_use]
    pub fn is_running(self) -> bool {
        self.running_kind().is_some()
    }

    /// The operation in flight for a `*Running` phase.
    #[must_use]
    pub fn running_kind(self) -> Option<OperationKind> {
        match self {
            Self::JustLaunched | Self::Idle => None,
            Self::PreBackupRunning => Some(OperationKind::PreBackup),
            Self::BackupRunning => Some(OperationKind::Backup),
            Self::ForgetRunning => Some(OperationKind::Forget),
            Self::UnlockRunning => Some(OperationKind::Unlock),
        }
    }
}

impl fmt::Display for CurrentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::JustLaunched => "just_launched",
            Self::Idle => "idle",
            Self::PreBackupRunning => "pre_backup_in_progress",
            Self::BackupRunning => "backup_in_progress",
            Self::ForgetRunning => "forget_in_progress",
            Self::UnlockRunning => "unlock_in_progress",
        };
        f.write_str(label)
    }
}

/// Outcome of a finished external process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    Ok,
    /// Generic failure (non-zero exit without a known signature, or a crash).
    #[serde(alias = "last_operation_failed")]
    OperationFailed,
    /// The tool reported a network timeout.
    NoNetwork,
    /// The repository is locked by another (possibly dead) process.
    RepoLocked,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ok => "ok",
            Self::OperationFailed => "operation_failed",
            Self::NoNetwork => "no_network",
            Self::RepoLocked => "repo_locked",
        };
        f.write_str(label)
    }
}

/// Terminal report the runner emits exactly once per operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    /// Operation that finished.
    pub kind: OperationKind,
    pub status: CompletionStatus,
    /// Wall-clock time the process was started.
    pub started_at: DateTime<Utc>,
    /// Process start to process exit.
    pub duration: Duration,
    /// Stale lock detected; unlock then retry.
    pub needs_unlock: bool,
}

impl CompletionEvent {
    /// Build a successful completion.
    #[must_use]
    pub fn ok(kind: OperationKind, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            kind,
            status: CompletionStatus::Ok,
            started_at,
            duration,
            needs_unlock: false,
        }
    }

    /// Build a failed completion with the given status.
    #[must_use]
    pub fn failed(
        kind: OperationKind,
        status: CompletionStatus,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            kind,
            status,
            started_at,
            duration,
            needs_unlock: false,
        }
    }
}
