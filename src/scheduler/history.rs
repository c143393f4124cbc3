//! Bounded, most-recent-first record of completed operation timings.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Timestamp layout used in the persisted state record.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One (start, duration) pair for a completed operation.
///
/// Persisted as `["YYYY-MM-DD HH:MM:SS", seconds]`. The start is kept to the
/// second and the duration to the hundredth of a second so that a save/load
/// cycle reproduces the entry exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(String, f64)", into = "(String, f64)")]
pub struct Chrono {
    started_at: DateTime<Utc>,
    seconds: f64,
}

impl Chrono {
    /// Build a chrono, normalising both fields to their persisted precision.
    #[must_use]
    pub fn new(started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            started_at: started_at.trunc_subsecs(0),
            seconds: round_centis(duration.as_secs_f64()),
        }
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Duration in seconds.
    #[must_use]
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.seconds).unwrap_or_default()
    }
}

fn round_centis(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

/// Parse a timestamp written with [`DATE_FORMAT`] as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Render a UTC timestamp with [`DATE_FORMAT`].
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(DATE_FORMAT).to_string()
}

impl TryFrom<(String, f64)> for Chrono {
    type Error = String;

    fn try_from((raw, seconds): (String, f64)) -> Result<Self, Self::Error> {
        let started_at =
            parse_timestamp(&raw).ok_or_else(|| format!("invalid chrono timestamp: {raw}"))?;
        if Duration::try_from_secs_f64(seconds).is_err() {
            return Err(format!("invalid chrono duration: {seconds}"));
        }
        Ok(Self {
            started_at,
            seconds: round_centis(seconds),
        })
    }
}

impl From<Chrono> for (String, f64) {
    fn from(chrono: Chrono) -> Self {
        (format_timestamp(chrono.started_at), chrono.seconds)
    }
}

/// Fixed-capacity history. Index 0 is always the newest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChronoHistory {
    entries: VecDeque<Chrono>,
    capacity: usize,
}

impl ChronoHistory {
    /// Create an empty history holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuild from persisted entries, already newest first.
    ///
    /// Extra entries beyond `capacity` are dropped from the old end.
    #[must_use]
    pub fn from_entries(entries: Vec<Chrono>, capacity: usize) -> Self {
        let mut history = Self::new(capacity);
        history.entries.extend(entries);
        history.trim();
        history
    }

    /// Insert at the front, evicting the oldest entry on overflow.
    pub fn push(&mut self, chrono: Chrono) {
        self.entries.push_front(chrono);
        self.trim();
    }

    fn trim(&mut self) {
        if self.entries.len() > self.capacity {
            self.entries.truncate(self.capacity);
        }
    }

    #[must_use]
    pub fn latest(&self) -> Option<&Chrono> {
        self.entries.front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chrono> {
        self.entries.iter()
    }

    /// Mean duration over the retained entries.
    #[must_use]
    pub fn average(&self) -> Option<Duration> {
        if self.entries.is_empty() {
            return None;
        }
        let total: f64 = self.entries.iter().map(Chrono::seconds).sum();
        Duration::try_from_secs_f64(total / self.entries.len() as f64).ok()
    }

    /// Entries newest first, for persistence.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Chrono> {
        self.entries.iter().copied().collect()
    }
}
