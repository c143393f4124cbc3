//! Streamed classification of restic diagnostics.
//!
//! restic reports its failures on stderr. Two signatures matter to the
//! scheduler: network timeouts and repository locks. For a lock, restic
//! also prints how long ago the lock was created, which decides whether it
//! is safe to break.

use crate::restic::{compile_regex, is_match};
use crate::restic::process::ProcessExit;
use crate::scheduler::operation::CompletionStatus;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static TIMEOUT: LazyLock<Option<Regex>> = LazyLock::new(|| compile_regex(r"(?i)timeout"));
static LOCK_HINT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_regex(r"unable to create lock|the `unlock` command can be used to remove stale locks")
});
static LOCK_CREATED: LazyLock<Option<Regex>> = LazyLock::new(|| compile_regex(r"lock was created at"));
static PARENTHESISED: LazyLock<Option<Regex>> = LazyLock::new(|| compile_regex(r"\(([^()]*)\)"));
static DURATION_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_regex(r"(\d+(?:\.\d+)?)(h|ms|m|s|µs|us|ns)"));

/// Age of a repository lock as printed by restic (a Go duration).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LockAge {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: f64,
}

impl LockAge {
    /// Parse the last parenthesised Go duration in `text`, e.g.
    /// `lock was created at 2024-05-01 10:00:00 (2h15m3.5s ago)` or `(45m)`.
    ///
    /// Text without parentheses is parsed as a bare duration. Returns `None`
    /// when no duration token is found.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let fragment = PARENTHESISED
            .as_ref()
            .and_then(|regex| regex.captures_iter(text).last())
            .and_then(|caps| caps.get(1))
            .map_or(text, |m| m.as_str());

        let mut age = Self::default();
        let mut found = false;
        for caps in DURATION_TOKEN.iter().flat_map(|regex| regex.captures_iter(fragment)) {
            let Ok(value) = caps[1].parse::<f64>() else {
                continue;
            };
            found = true;
            match &caps[2] {
                "h" => age.hours += value as u64,
                "m" => age.minutes += value as u64,
                "s" => age.seconds += value,
                _ => {}
            }
        }
        found.then_some(age)
    }

    /// A lock is stale when it has an hour component, or when its minute
    /// component is strictly above `stale_after_minutes`.
    #[must_use]
    pub fn is_stale(&self, stale_after_minutes: u64) -> bool {
        self.hours > 0 || self.minutes > stale_after_minutes
    }
}

impl fmt::Display for LockAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hours > 0 {
            write!(f, "{}h", self.hours)?;
        }
        write!(f, "{}m", self.minutes)
    }
}

/// Something worth reporting found in a diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Finding {
    /// The tool gave up on a network operation.
    Timeout,
    /// The repository is locked.
    Lock {
        /// Age parsed from an earlier `lock was created at` line, if any.
        age: Option<LockAge>,
        /// Old enough to break automatically.
        stale: bool,
    },
}

/// Accumulates findings for one in-flight operation.
#[derive(Debug, Clone)]
pub struct OutputClassifier {
    stale_after_minutes: u64,
    candidate: Option<CompletionStatus>,
    lock_age: Option<LockAge>,
    needs_unlock: bool,
}

impl OutputClassifier {
    #[must_use]
    pub fn new(stale_after_minutes: u64) -> Self {
        Self {
            stale_after_minutes,
            candidate: None,
            lock_age: None,
            needs_unlock: false,
        }
    }

    /// Inspect one stderr line. The last matching signature wins.
    pub fn observe(&mut self, line: &str) -> Option<Finding> {
        if is_match(&LOCK_CREATED, line) {
            self.lock_age = LockAge::parse(line);
        }

        if is_match(&LOCK_HINT, line) {
            let stale = self
                .lock_age
                .is_some_and(|age| age.is_stale(self.stale_after_minutes));
            self.candidate = Some(CompletionStatus::RepoLocked);
            self.needs_unlock = stale;
            return Some(Finding::Lock {
                age: self.lock_age,
                stale,
            });
        }

        if is_match(&TIMEOUT, line) {
            self.candidate = Some(CompletionStatus::NoNetwork);
            return Some(Finding::Timeout);
        }
        None
    }

    /// Final status and unlock request for the given process exit.
    ///
    /// A zero exit code is authoritative for success. Signals and lost
    /// processes always count as a generic failure.
    #[must_use]
    pub fn verdict(&self, exit: &ProcessExit) -> (CompletionStatus, bool) {
        let status = match exit {
            ProcessExit::Code(0) => CompletionStatus::Ok,
            ProcessExit::Code(_) => self.candidate.unwrap_or(CompletionStatus::OperationFailed),
            ProcessExit::Signal(_) | ProcessExit::Lost(_) => CompletionStatus::OperationFailed,
        };
        let needs_unlock = status == CompletionStatus::RepoLocked && self.needs_unlock;
        (status, needs_unlock)
    }
}
