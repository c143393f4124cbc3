//! New-release bookkeeping.
//!
//! Fetching the latest published version is left to the caller; this module
//! only decides when a check is due and whether the recorded version is
//! newer than the running one. Both fields live in the scheduler state
//! record.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Last version check and its result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionCheck {
    last_checked_at: Option<DateTime<Utc>>,
    latest_available: Option<String>,
}

impl VersionCheck {
    #[must_use]
    pub fn new(last_checked_at: Option<DateTime<Utc>>, latest_available: Option<String>) -> Self {
        Self {
            last_checked_at,
            latest_available,
        }
    }

    /// Returns `true` if no check was recorded or the last one is at least
    /// `every_n_days` old.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>, every_n_days: u32) -> bool {
        match self.last_checked_at {
            None => true,
            Some(last) => now.signed_duration_since(last).num_days() >= i64::from(every_n_days),
        }
    }

    /// Store the outcome of a check performed at `now`.
    pub fn record_latest(&mut self, version: impl Into<String>, now: DateTime<Utc>) {
        self.latest_available = Some(version.into());
        self.last_checked_at = Some(now);
    }

    /// Returns `true` when the recorded latest release is newer than `current`.
    #[must_use]
    pub fn needs_upgrade(&self, current: &str) -> bool {
        self.latest_available
            .as_deref()
            .is_some_and(|latest| compare_versions(latest, current) == Ordering::Greater)
    }

    #[must_use]
    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.last_checked_at
    }

    #[must_use]
    pub fn latest_available(&self) -> Option<&str> {
        self.latest_available.as_deref()
    }
}

/// Compare dotted versions component by component.
///
/// Numeric components compare as numbers, anything else as text. A missing
/// trailing component counts as lower (`1.2 < 1.2.1`).
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.trim().trim_start_matches('v').split('.').collect();
    let b_parts: Vec<&str> = b.trim().trim_start_matches('v').split('.').collect();

    for (x, y) in a_parts.iter().zip(b_parts.iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a_parts.len().cmp(&b_parts.len())
}
