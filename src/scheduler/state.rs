//! Scheduler state and its transition rules.
//!
//! [`SchedulerState`] owns the operation queue, the forget countdown and the
//! chrono histories. It is driven from a single event loop: the loop asks
//! [`SchedulerState::want_to_run`] on each tick, pops work with
//! [`SchedulerState::next_operation`] and feeds each process outcome back
//! through [`SchedulerState::on_operation_finished`].

use crate::scheduler::history::{Chrono, ChronoHistory};
use crate::scheduler::operation::{CompletionEvent, CompletionStatus, CurrentPhase, OperationKind};
use crate::update::VersionCheck;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Policy constants supplied at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerPolicy {
    /// A forget is queued after this many successful backups.
    pub forget_every_n_backups: u32,
    /// Maximum number of chronos kept per operation kind.
    pub history_capacity: usize,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            forget_every_n_backups: 10,
            history_capacity: 10,
        }
    }
}

/// Process-wide scheduler state.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub(super) phase: CurrentPhase,
    pub(super) status: CompletionStatus,
    pub(super) queue: VecDeque<OperationKind>,
    pub(super) backups_before_forget: u32,
    pub(super) last_failed_at: Option<DateTime<Utc>>,
    pub(super) backup_chronos: ChronoHistory,
    pub(super) forget_chronos: ChronoHistory,
    pub(super) pre_backup_failed: bool,
    pub(super) version_check: VersionCheck,
    pub(super) cycle_started_at: Option<DateTime<Utc>>,
    /// Set once an unlock-then-retry has been queued in the current cycle.
    pub(super) retried_after_unlock: bool,
    pub(super) policy: SchedulerPolicy,
}

impl SchedulerState {
    /// Fresh state as on the very first launch.
    #[must_use]
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self {
            phase: CurrentPhase::JustLaunched,
            status: CompletionStatus::Ok,
            queue: VecDeque::new(),
            backups_before_forget: policy.forget_every_n_backups,
            last_failed_at: None,
            backup_chronos: ChronoHistory::new(policy.history_capacity),
            forget_chronos: ChronoHistory::new(policy.history_capacity),
            pre_backup_failed: false,
            version_check: VersionCheck::default(),
            cycle_started_at: None,
            retried_after_unlock: false,
            policy,
        }
    }

    /// Decide whether a new cycle may begin and, if so, fill the queue.
    ///
    /// Refused while any operation is in flight. Ticks are level-triggered:
    /// a refused tick is dropped, never deferred.
    pub fn want_to_run(&mut self, pre_backup_available: bool, now: DateTime<Utc>) -> bool {
        if self.phase.is_running() {
            debug!(phase = %self.phase, "cycle refused, operation in flight");
            return false;
        }

        self.queue.clear();
        if pre_backup_available {
            self.queue.push_back(OperationKind::PreBackup);
        }
        self.queue.push_back(OperationKind::Backup);
        self.cycle_started_at = Some(now);
        self.retried_after_unlock = false;
        true
    }

    /// Pop the queue head and enter its running phase.
    ///
    /// An empty queue moves the scheduler to [`CurrentPhase::Idle`] and
    /// returns `None`; this is the only way back to idle.
    pub fn next_operation(&mut self) -> Option<OperationKind> {
        match self.queue.pop_front() {
            Some(kind) => {
                if kind == OperationKind::PreBackup {
                    self.pre_backup_failed = false;
                }
                self.phase = kind.running_phase();
                Some(kind)
            }
            None => {
                self.phase = CurrentPhase::Idle;
                None
            }
        }
    }

    /// Apply the outcome of the operation that was in flight.
    pub fn on_operation_finished(&mut self, event: &CompletionEvent) {
        let kind = match self.phase.running_kind() {
            Some(running) => {
                if running != event.kind {
                    warn!(
                        phase = %self.phase,
                        reported = %event.kind,
                        "completion does not match the running phase, using the phase"
                    );
                }
                running
            }
            None => {
                warn!(phase = %self.phase, reported = %event.kind, "completion with no operation in flight");
                event.kind
            }
        };

        let finished_at = finished_at(event);
        match event.status {
            CompletionStatus::Ok => self.record_success(kind, event),
            CompletionStatus::RepoLocked => {
                self.last_failed_at = Some(finished_at);
            }
            CompletionStatus::OperationFailed | CompletionStatus::NoNetwork => {
                if kind == OperationKind::PreBackup {
                    self.pre_backup_failed = true;
                } else {
                    self.queue.clear();
                    self.last_failed_at = Some(finished_at);
                }
            }
        }

        if event.needs_unlock {
            self.schedule_unlock_retry(kind, event.status);
        }

        self.status = event.status;
    }

    fn record_success(&mut self, kind: OperationKind, event: &CompletionEvent) {
        let chrono = Chrono::new(event.started_at, event.duration);
        match kind {
            OperationKind::Backup => {
                self.backup_chronos.push(chrono);
                self.backups_before_forget = self.backups_before_forget.saturating_sub(1);
                if self.backups_before_forget == 0 {
                    self.backups_before_forget = self.policy.forget_every_n_backups;
                    self.queue.push_back(OperationKind::Forget);
                    info!("forget period reached, cleanup queued");
                }
            }
            OperationKind::Forget => self.forget_chronos.push(chrono),
            OperationKind::PreBackup | OperationKind::Unlock => {}
        }
    }

    fn schedule_unlock_retry(&mut self, kind: OperationKind, status: CompletionStatus) {
        if status != CompletionStatus::RepoLocked {
            return;
        }
        if !matches!(kind, OperationKind::Backup | OperationKind::Forget) {
            debug!(%kind, "unlock request ignored for this operation");
            return;
        }
        if self.retried_after_unlock {
            warn!(%kind, "repository still locked after unlock, waiting for next tick");
            return;
        }

        self.retried_after_unlock = true;
        self.queue.push_front(kind);
        if self.queue.front() != Some(&OperationKind::Unlock) {
            self.queue.push_front(OperationKind::Unlock);
        }
        info!(%kind, "stale lock, unlock then retry queued");
    }

    /// Drop every pending operation. The in-flight one, if any, is untouched.
    pub fn discard_pending(&mut self) {
        if !self.queue.is_empty() {
            debug!(pending = self.queue.len(), "discarding pending operations");
        }
        self.queue.clear();
    }

    #[must_use]
    pub fn phase(&self) -> CurrentPhase {
        self.phase
    }

    /// Status of the last completed operation.
    #[must_use]
    pub fn status(&self) -> CompletionStatus {
        self.status
    }

    /// Pending operations, head first.
    #[must_use]
    pub fn queue(&self) -> Vec<OperationKind> {
        self.queue.iter().copied().collect()
    }

    #[must_use]
    pub fn backups_before_forget(&self) -> u32 {
        self.backups_before_forget
    }

    #[must_use]
    pub fn last_failed_at(&self) -> Option<DateTime<Utc>> {
        self.last_failed_at
    }

    #[must_use]
    pub fn backup_chronos(&self) -> &ChronoHistory {
        &self.backup_chronos
    }

    #[must_use]
    pub fn forget_chronos(&self) -> &ChronoHistory {
        &self.forget_chronos
    }

    #[must_use]
    pub fn pre_backup_failed(&self) -> bool {
        self.pre_backup_failed
    }

    /// When the current (or last) cycle was granted.
    #[must_use]
    pub fn cycle_started_at(&self) -> Option<DateTime<Utc>> {
        self.cycle_started_at
    }

    #[must_use]
    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    #[must_use]
    pub fn version_check(&self) -> &VersionCheck {
        &self.version_check
    }

    pub fn version_check_mut(&mut self) -> &mut VersionCheck {
        &mut self.version_check
    }
}

fn finished_at(event: &CompletionEvent) -> DateTime<Utc> {
    chrono::Duration::from_std(event.duration)
        .ok()
        .and_then(|elapsed| event.started_at.checked_add_signed(elapsed))
        .unwrap_or(event.started_at)
}
