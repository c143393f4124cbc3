//! restic-warden: periodic restic backups driven by a small state machine.
//!
//! A single event loop ticks on a fixed period and runs, in order, an
//! optional pre-backup hook, `restic backup`, and every N successful backups
//! `restic forget --prune`. Each child process is classified from its exit
//! code and stderr into a [`CompletionStatus`], which decides what runs next:
//! a stale repository lock triggers `restic unlock` and one retry.
//!
//! # Layout
//!
//! - [`scheduler`]: operation model, state machine, persistence, event loop
//! - [`restic`]: child environment, argument contracts, output classification
//! - [`journal`]: the human-readable operation log
//! - [`status`]: display-agnostic status snapshot

pub mod config;
pub mod error;
pub mod journal;
pub mod restic;
pub mod scheduler;
pub mod status;
pub mod update;
pub mod warden_dirs;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use journal::{Journal, MemoryLog, OperationLog};
pub use scheduler::{
    BackupScheduler, CompletionEvent, CompletionStatus, CurrentPhase, OperationKind,
    SchedulerPolicy, SchedulerSettings, SchedulerState, StateStore,
};
pub use status::StatusSnapshot;
