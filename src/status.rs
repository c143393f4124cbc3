//! Display-agnostic status snapshot and its human-readable report.
//!
//! The scheduler publishes a [`StatusSnapshot`] after every phase or status
//! change; a tray, a CLI or anything else renders it with
//! [`StatusSnapshot::report`].

use crate::scheduler::history::ChronoHistory;
use crate::scheduler::operation::{CompletionStatus, CurrentPhase};
use crate::scheduler::state::SchedulerState;
use chrono::{DateTime, Local, Utc};
use std::time::Duration;

/// Everything a presentation layer needs, detached from the live state.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub phase: CurrentPhase,
    pub status: CompletionStatus,
    pub pre_backup_failed: bool,
    pub last_failed_at: Option<DateTime<Utc>>,
    /// Start of the operation in flight.
    pub operation_started_at: Option<DateTime<Utc>>,
    /// Tick period.
    pub backup_every: Duration,
    pub backup_chronos: ChronoHistory,
    pub forget_chronos: ChronoHistory,
    /// A newer release has been recorded.
    pub upgrade_available: Option<String>,
}

impl StatusSnapshot {
    /// Snapshot of `state`.
    #[must_use]
    pub fn capture(
        state: &SchedulerState,
        operation_started_at: Option<DateTime<Utc>>,
        backup_every: Duration,
    ) -> Self {
        let check = state.version_check();
        let upgrade_available = if check.needs_upgrade(env!("CARGO_PKG_VERSION")) {
            check.latest_available().map(str::to_owned)
        } else {
            None
        };
        Self {
            phase: state.phase(),
            status: state.status(),
            pre_backup_failed: state.pre_backup_failed(),
            last_failed_at: state.last_failed_at(),
            operation_started_at: if state.phase().is_running() {
                operation_started_at
            } else {
                None
            },
            backup_every,
            backup_chronos: state.backup_chronos().clone(),
            forget_chronos: state.forget_chronos().clone(),
            upgrade_available,
        }
    }

    /// One-line summary of the current phase/status.
    #[must_use]
    pub fn headline(&self, now: DateTime<Utc>) -> String {
        let failed_at = || {
            self.last_failed_at
                .map_or_else(String::new, |ts| format!(" {}", format_date(ts, now)))
        };
        let started = |label: &str| match self.operation_started_at {
            Some(ts) => format!("{label} (started {})", format_date(ts, now)),
            None => label.to_owned(),
        };

        match self.phase {
            CurrentPhase::JustLaunched => format!(
                "Just launched, a backup will be done every {}.",
                format_duration(self.backup_every, true)
            ),
            CurrentPhase::Idle => match self.status {
                CompletionStatus::Ok if self.pre_backup_failed => {
                    "Last backup was successful but pre-backup hook failed".to_owned()
                }
                CompletionStatus::Ok => "Last backup was successful".to_owned(),
                CompletionStatus::OperationFailed => format!(
                    "Last operation failed{}. See the journal for details.",
                    failed_at()
                ),
                CompletionStatus::NoNetwork => format!("Network timeout{}", failed_at()),
                CompletionStatus::RepoLocked => format!(
                    "Repository locked{}. See the journal for details.",
                    failed_at()
                ),
            },
            CurrentPhase::PreBackupRunning => started("Pre-backup in progress"),
            CurrentPhase::BackupRunning => started("Backup in progress"),
            CurrentPhase::ForgetRunning => started("Cleanup in progress"),
            CurrentPhase::UnlockRunning => started("Unlock in progress"),
        }
    }

    /// Full multi-line report: version, headline, chronos, upgrade notice.
    #[must_use]
    pub fn report(&self, now: DateTime<Utc>) -> String {
        let mut report = format!(
            "restic-warden {}\n\n{}",
            env!("CARGO_PKG_VERSION"),
            self.headline(now)
        );

        let chronos = [
            chrono_summary("backup", &self.backup_chronos, now),
            chrono_summary("cleanup", &self.forget_chronos, now),
        ]
        .concat();
        if !chronos.is_empty() {
            report.push('\n');
            report.push_str(&chronos);
        }
        if let Some(version) = &self.upgrade_available {
            report.push_str(&format!("\n\nNew release available: {version}"));
        }
        report
    }
}

fn chrono_summary(subject: &str, chronos: &ChronoHistory, now: DateTime<Utc>) -> String {
    let Some(latest) = chronos.latest() else {
        return String::new();
    };
    let mut summary = format!(
        "\n-> latest {subject} {} : {}",
        format_date(latest.started_at(), now),
        format_duration(latest.duration(), false)
    );
    if chronos.len() >= 2
        && let Some(average) = chronos.average()
    {
        summary.push_str(&format!(
            "\naverage over the last {} : {}",
            chronos.len(),
            format_duration(average, false)
        ));
    }
    summary
}

/// `at HH:MM:SS` within the last 24 hours, `on YYYY-MM-DD HH:MM:SS` otherwise
/// (local time).
#[must_use]
pub fn format_date(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let local = ts.with_timezone(&Local);
    if now.signed_duration_since(ts) < chrono::Duration::days(1) {
        format!("at {}", local.format("%H:%M:%S"))
    } else {
        format!("on {}", local.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Render whole seconds as `Xh Ym Zs`.
///
/// The full form drops leading zero units (`5m 0s`). The shortest form also
/// drops trailing zero units (`30m`, `2h`) but keeps the minutes between
/// non-zero hours and seconds (`1h 0m 5s`).
#[must_use]
pub fn format_duration(duration: Duration, shortest: bool) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if shortest {
        return match (hours > 0, minutes > 0, seconds > 0) {
            (true, _, true) => format!("{hours}h {minutes}m {seconds}s"),
            (true, true, false) => format!("{hours}h {minutes}m"),
            (true, false, false) => format!("{hours}h"),
            (false, true, true) => format!("{minutes}m {seconds}s"),
            (false, true, false) => format!("{minutes}m"),
            (false, false, _) => format!("{seconds}s"),
        };
    }

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
