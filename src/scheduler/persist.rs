//! On-disk scheduler state record.
//!
//! The record is a JSON object persisted to `state.json` after every phase
//! transition. Every field defaults when missing and an unparseable file is
//! treated as a first launch. Writes go through a temp file and a rename so
//! a crash never leaves a truncated record behind.

use crate::error::{Result, WardenError};
use crate::scheduler::history::{Chrono, ChronoHistory, format_timestamp, parse_timestamp};
use crate::scheduler::operation::{CompletionStatus, CurrentPhase};
use crate::scheduler::state::{SchedulerPolicy, SchedulerState};
use crate::update::VersionCheck;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Serialized form of [`SchedulerState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateRecord {
    pub current_operation: CurrentPhase,
    pub current_status: CompletionStatus,
    /// Absent on first launch; the configured period applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nb_backups_before_forget: Option<u32>,
    /// Newest first.
    pub prev_backup_chronos: Vec<Chrono>,
    /// Newest first.
    pub prev_forget_chronos: Vec<Chrono>,
    #[serde(with = "optional_timestamp")]
    pub last_failed_at: Option<DateTime<Utc>>,
    pub pre_backup_failed: bool,
    #[serde(with = "optional_timestamp")]
    pub last_check_new_version_datetime: Option<DateTime<Utc>>,
    pub latest_version_available: Option<String>,
    /// Version of the program that wrote the record.
    pub version: Option<String>,
}

mod optional_timestamp {
    use super::{DateTime, Utc, format_timestamp, parse_timestamp};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_some(&format_timestamp(*ts)),
            None => serializer.serialize_none(),
        }
    }

    /// Unreadable timestamps degrade to `None` instead of failing the record.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }
}

impl StateRecord {
    /// Snapshot the persistent part of `state`.
    #[must_use]
    pub fn capture(state: &SchedulerState) -> Self {
        Self {
            current_operation: state.phase,
            current_status: state.status,
            nb_backups_before_forget: Some(state.backups_before_forget),
            prev_backup_chronos: state.backup_chronos.to_vec(),
            prev_forget_chronos: state.forget_chronos.to_vec(),
            last_failed_at: state.last_failed_at,
            pre_backup_failed: state.pre_backup_failed,
            last_check_new_version_datetime: state.version_check.last_checked_at(),
            latest_version_available: state.version_check.latest_available().map(str::to_owned),
            version: Some(env!("CARGO_PKG_VERSION").to_owned()),
        }
    }

    /// Rebuild a scheduler state from this record.
    ///
    /// A record written while an operation was in flight means the previous
    /// run died mid-operation: the operation is reported as failed at `now`
    /// and never resumed.
    #[must_use]
    pub fn restore(self, policy: SchedulerPolicy, now: DateTime<Utc>) -> SchedulerState {
        let mut state = self.view(policy);
        state.phase = match state.phase.running_kind() {
            Some(kind) => {
                tracing::warn!(%kind, "previous run stopped while an operation was in flight, marking it failed");
                state.status = CompletionStatus::OperationFailed;
                state.last_failed_at = Some(now);
                CurrentPhase::Idle
            }
            None => CurrentPhase::JustLaunched,
        };
        state
    }

    /// The recorded state as written, running phase included.
    ///
    /// For observers of a live scheduler; a new scheduler must use
    /// [`StateRecord::restore`].
    #[must_use]
    pub fn view(self, policy: SchedulerPolicy) -> SchedulerState {
        let mut state = SchedulerState::new(policy);
        state.phase = self.current_operation;
        state.status = self.current_status;
        state.last_failed_at = self.last_failed_at;
        state.backups_before_forget = match self.nb_backups_before_forget {
            Some(0) | None => policy.forget_every_n_backups,
            Some(n) => n,
        };
        state.backup_chronos =
            ChronoHistory::from_entries(self.prev_backup_chronos, policy.history_capacity);
        state.forget_chronos =
            ChronoHistory::from_entries(self.prev_forget_chronos, policy.history_capacity);
        state.pre_backup_failed = self.pre_backup_failed;
        state.version_check = VersionCheck::new(
            self.last_check_new_version_datetime,
            self.latest_version_available,
        );
        state
    }
}

/// File-backed store for the scheduler state record.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Bind the store to `path`, creating its parent directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created. This is the only
    /// state-file failure that aborts startup.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WardenError::State(format!(
                    "cannot create state directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw record. Missing or corrupt files yield `None`.
    #[must_use]
    pub fn read_record(&self) -> Option<StateRecord> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("cannot read state record at {}: {e}", self.path.display());
                return None;
            }
        };

        match serde_json::from_slice::<StateRecord>(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    "ignoring malformed state record at {}: {e}",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Load the scheduler state, falling back to a first launch.
    #[must_use]
    pub fn load(&self, policy: SchedulerPolicy, now: DateTime<Utc>) -> SchedulerState {
        match self.read_record() {
            Some(record) => record.restore(policy, now),
            None => SchedulerState::new(policy),
        }
    }

    /// Persist `state` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn save(&self, state: &SchedulerState) -> Result<()> {
        self.write_record(&StateRecord::capture(state))
    }

    /// Persist a raw record atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn write_record(&self, record: &StateRecord) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| WardenError::State(format!("cannot serialize state record: {e}")))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| WardenError::State(format!("cannot write state temp file: {e}")))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| WardenError::State(format!("cannot finalize state record: {e}")))?;
        Ok(())
    }
}
