//! Operation journal: the human-readable log of every run.
//!
//! The scheduler writes process output, section headers and outcomes through
//! the [`OperationLog`] trait. [`Journal`] appends them to a daily file and
//! mirrors them to `tracing`; [`MemoryLog`] keeps them in memory.

pub mod rotation;

use chrono::Local;
use rotation::RotatingFileWriter;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Width of the rule that opens a section.
const SECTION_RULE_WIDTH: usize = 50;

/// Prefix marking lines from the error stream.
pub const ERROR_PREFIX: &str = "! ";

/// Sink for the operation journal.
pub trait OperationLog: Send {
    /// Record regular output. Multi-line text is split into lines.
    fn write(&mut self, text: &str);
    /// Record error output; every line is prefixed with [`ERROR_PREFIX`].
    fn error(&mut self, text: &str);
    /// Open a new dated section, optionally titled.
    fn write_section(&mut self, header: &str);
}

fn section_lines(header: &str) -> Vec<String> {
    let mut lines = vec![
        "-".repeat(SECTION_RULE_WIDTH),
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    ];
    if !header.is_empty() {
        lines.push(header.to_owned());
    }
    lines
}

/// File-backed journal.
///
/// If the journal file cannot be opened or written, entries still reach
/// `tracing`.
pub struct Journal {
    writer: Option<RotatingFileWriter>,
}

impl Journal {
    /// Open the journal in `dir`.
    #[must_use]
    pub fn open(dir: &Path) -> Self {
        let writer = match RotatingFileWriter::open(dir) {
            Ok(writer) => Some(writer),
            Err(e) => {
                tracing::error!("cannot open journal in {}: {e}", dir.display());
                None
            }
        };
        Self { writer }
    }

    /// Journal that only mirrors to `tracing`.
    #[must_use]
    pub fn tracing_only() -> Self {
        Self { writer: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.writer.as_ref().map(RotatingFileWriter::path)
    }

    fn append(&mut self, line: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.append_line(line) {
            tracing::error!("journal write failed, continuing without file: {e}");
            self.writer = None;
        }
    }
}

impl OperationLog for Journal {
    fn write(&mut self, text: &str) {
        for line in text.lines() {
            tracing::info!(target: "restic_warden::journal", "{line}");
            self.append(line);
        }
    }

    fn error(&mut self, text: &str) {
        for line in text.lines() {
            tracing::warn!(target: "restic_warden::journal", "{line}");
            self.append(&format!("{ERROR_PREFIX}{line}"));
        }
    }

    fn write_section(&mut self, header: &str) {
        if !header.is_empty() {
            tracing::info!(target: "restic_warden::journal", "{header}");
        }
        for line in section_lines(header) {
            self.append(&line);
        }
    }
}

/// In-memory journal whose entries can be inspected through a cloned handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded line.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns `true` if any recorded line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    fn push(&self, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(line);
    }
}

impl OperationLog for MemoryLog {
    fn write(&mut self, text: &str) {
        for line in text.lines() {
            self.push(line.to_owned());
        }
    }

    fn error(&mut self, text: &str) {
        for line in text.lines() {
            self.push(format!("{ERROR_PREFIX}{line}"));
        }
    }

    fn write_section(&mut self, header: &str) {
        for line in section_lines(header) {
            self.push(line);
        }
    }
}
